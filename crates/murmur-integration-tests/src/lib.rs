//! Integration tests for the murmur message cache.
//!
//! The tests drive [`murmur_db::storage::Storage`] end to end: units go
//! through the task queue, databases live on disk where reopening matters.
//! This library only holds the fixtures they share.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p murmur-integration-tests
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use murmur_db::config::StoreConfig;
use murmur_db::files::{FileManager, NoopFileManager};
use murmur_db::storage::Storage;
use murmur_types::records::{Message, SendState};
use murmur_types::{DialogId, MessageId, Timestamp};

/// A scratch directory removed on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(label: &str) -> Self {
        let suffix: u64 = rand::random();
        let path = std::env::temp_dir().join(format!("murmur-{label}-{}", hex::encode(suffix.to_le_bytes())));
        std::fs::create_dir_all(&path).expect("create scratch dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the database file inside the directory.
    pub fn database(&self) -> PathBuf {
        self.path.join("cache4.db")
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Default configuration pointing at `dir`.
pub fn config_in(dir: &ScratchDir) -> StoreConfig {
    let mut config = StoreConfig::default();
    config.database.data_dir = dir.path().to_string_lossy().into_owned();
    config
}

/// Open a file-backed store in `dir`.
pub fn open_store(dir: &ScratchDir) -> Storage {
    open_store_with(dir, Arc::new(NoopFileManager))
}

pub fn open_store_with(dir: &ScratchDir, files: Arc<dyn FileManager>) -> Storage {
    Storage::open(&config_in(dir), files).expect("open storage")
}

/// An incoming, unread, confirmed text message.
pub fn message(id: MessageId, dialog_id: DialogId, date: Timestamp) -> Message {
    Message {
        id,
        dialog_id,
        random_id: None,
        from_id: 7,
        date,
        out: false,
        read_state: 0,
        send_state: SendState::Confirmed,
        ttl: 0,
        important: false,
        media: None,
        keyboard: None,
        reply_to: None,
        reply_preview: None,
        payload: format!("message {id}").into_bytes(),
    }
}

/// Messages `ids` of one dialog, dated ten seconds apart by id.
pub fn messages(dialog_id: DialogId, ids: impl IntoIterator<Item = MessageId>) -> Vec<Message> {
    ids.into_iter()
        .map(|id| message(id, dialog_id, 1_000 + id * 10))
        .collect()
}
