//! Shared-media pages and counts.

use rusqlite::Connection;
use serde_json::json;

use murmur_types::events::EventType;
use murmur_types::ids::local_part;
use murmur_types::records::{MediaKind, Message};
use murmur_types::{DialogId, MessageId};

use crate::holes::{self, HoleKey};
use crate::queries::media;
use crate::worker::Worker;
use crate::{in_transaction, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaPage {
    pub messages: Vec<Message>,
    /// No older media of this kind remains to be loaded.
    pub is_end: bool,
}

/// Media of one kind older than `max_id` (newest first when zero), cut at
/// the nearest media hole.
pub fn get_media(
    conn: &Connection,
    dialog_id: DialogId,
    kind: MediaKind,
    max_id: MessageId,
    count: usize,
) -> Result<MediaPage> {
    let key = HoleKey::media(dialog_id, kind);
    let boundary = holes::query_boundary(conn, &key)?;
    let upper = (max_id != 0).then(|| max_id - 1);
    let probe = upper.unwrap_or(i64::MAX);
    if holes::is_inside_hole(conn, &key, probe)? {
        return Ok(MediaPage::default());
    }
    let floor = holes::max_end_at_or_below(conn, &key, probe)?;
    let messages = media::page(conn, dialog_id, kind, floor, upper, count)?;
    let bottom = floor.map_or(true, |f| local_part(f) <= 1);
    let is_end = boundary && bottom && messages.len() < count;
    Ok(MediaPage { messages, is_end })
}

/// Store a fetched media page and close the matching media hole.
///
/// `max_id` is the id the page was requested below (zero for the newest
/// page); `reached_end` reports that the server has nothing older.
pub fn put_media(
    conn: &Connection,
    dialog_id: DialogId,
    kind: MediaKind,
    page: &[Message],
    max_id: MessageId,
    reached_end: bool,
) -> Result<()> {
    let key = HoleKey::media(dialog_id, kind);
    in_transaction(conn, |tx| {
        for message in page {
            media::put(tx, message)?;
        }
        let confirmed = page.iter().map(|m| m.id).filter(|id| *id > 0);
        let min = confirmed.clone().min();
        let max = confirmed.max();
        let high = match (min, max) {
            (Some(min), Some(max)) => {
                let high = if max_id > 0 { max_id.max(max) } else { max };
                holes::close_range(tx, &key, min, high)?;
                high
            }
            _ => max_id,
        };
        if reached_end || page.is_empty() {
            holes::mark_complete_at_boundary(tx, &key, high)?;
        }
        Ok(())
    })
}

pub fn get_media_count(conn: &Connection, dialog_id: DialogId, kind: MediaKind) -> Result<Option<i32>> {
    media::get_count(conn, dialog_id, kind)
}

pub fn put_media_count(worker: &Worker, dialog_id: DialogId, kind: MediaKind, count: i32) -> Result<()> {
    media::put_count(worker.conn(), dialog_id, kind, count)?;
    worker.emit(
        EventType::MediaCountChanged,
        json!({ "dialog_id": dialog_id, "kind": kind, "count": count }),
    );
    Ok(())
}
