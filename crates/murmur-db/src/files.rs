//! File-manager collaborator.
//!
//! Storage never touches the filesystem for attachments. It hands media
//! references to a [`FileManager`], which resolves local paths and deletes
//! them on its own schedule.

use std::path::PathBuf;
use std::sync::Mutex;

use murmur_types::records::MediaReference;

pub trait FileManager: Send + Sync {
    /// Local cache path of a media reference, if the file was ever downloaded.
    fn resolve_local_path(&self, media: &MediaReference) -> Option<PathBuf>;

    /// Delete the given local files.
    fn delete_files(&self, paths: Vec<PathBuf>);
}

/// File manager that owns no files.
#[derive(Debug, Default)]
pub struct NoopFileManager;

impl FileManager for NoopFileManager {
    fn resolve_local_path(&self, _media: &MediaReference) -> Option<PathBuf> {
        None
    }

    fn delete_files(&self, _paths: Vec<PathBuf>) {}
}

/// File manager that keeps files under one directory, named by remote file id,
/// and records deletions instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingFileManager {
    pub root: PathBuf,
    deleted: Mutex<Vec<PathBuf>>,
}

impl RecordingFileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Paths handed to [`FileManager::delete_files`] so far.
    pub fn deleted(&self) -> Vec<PathBuf> {
        self.deleted
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }
}

impl FileManager for RecordingFileManager {
    fn resolve_local_path(&self, media: &MediaReference) -> Option<PathBuf> {
        let name = match &media.file_name {
            Some(name) => format!("{}_{}", media.file_id, name),
            None => media.file_id.to_string(),
        };
        Some(self.root.join(name))
    }

    fn delete_files(&self, paths: Vec<PathBuf>) {
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.extend(paths);
        }
    }
}
