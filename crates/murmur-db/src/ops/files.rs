//! Auto-download queue and the sent-file cache.

use rusqlite::Connection;
use serde_json::json;

use murmur_types::events::EventType;
use murmur_types::records::{DownloadItem, SentFile};

use crate::queries::{download_queue, sent_files};
use crate::worker::Worker;
use crate::{in_transaction, Result};

pub fn put_downloads(worker: &Worker, items: &[DownloadItem]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    in_transaction(worker.conn(), |tx| {
        for item in items {
            download_queue::put(tx, item)?;
        }
        Ok(())
    })?;
    worker.emit(EventType::DownloadQueueChanged, json!({ "queued": items.len() }));
    Ok(())
}

/// Remove finished downloads, or with `move_to_back` requeue them behind
/// every other entry of the same kind.
pub fn remove_downloads(worker: &Worker, ids: &[i64], kind: u32, move_to_back: bool) -> Result<usize> {
    let changed = download_queue::remove(worker.conn(), ids, kind, move_to_back)?;
    if changed > 0 {
        worker.emit(
            EventType::DownloadQueueChanged,
            json!({ "kind": kind, "moved": move_to_back }),
        );
    }
    Ok(changed)
}

/// Drop every queued download whose kind is in `kind_mask`; zero clears all.
pub fn clear_downloads(worker: &Worker, kind_mask: u32) -> Result<usize> {
    let cleared = download_queue::clear(worker.conn(), kind_mask)?;
    worker.emit(EventType::DownloadQueueChanged, json!({ "cleared": kind_mask }));
    Ok(cleared)
}

/// Next downloads of one kind, newest first.
pub fn top_downloads(worker: &Worker, kind: u32) -> Result<Vec<DownloadItem>> {
    download_queue::top(worker.conn(), kind, worker.limits.download_queue_batch)
}

pub fn put_sent_file(conn: &Connection, file: &SentFile) -> Result<()> {
    sent_files::put(conn, file)
}

pub fn get_sent_file(conn: &Connection, path: &str, kind: i32) -> Result<Option<SentFile>> {
    sent_files::get(conn, path, kind)
}
