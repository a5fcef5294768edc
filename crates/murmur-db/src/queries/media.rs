//! Media index and cached per-kind media counts.
//!
//! A media index row carries the same envelope as its message, so media
//! pages never touch the `messages` table.

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use murmur_types::records::{MediaKind, Message};
use murmur_types::{DialogId, MessageId};

use crate::queries::messages::envelope;
use crate::sql::execute_chunked;
use crate::Result;

/// Index one message under its media kind. Messages without media are ignored.
pub fn put(conn: &Connection, message: &Message) -> Result<bool> {
    let Some(media) = &message.media else {
        return Ok(false);
    };
    conn.execute(
        "INSERT OR REPLACE INTO media_index (mid, uid, date, type, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id,
            message.dialog_id,
            message.date,
            media.kind.as_i32(),
            envelope(message)?,
        ],
    )?;
    Ok(true)
}

/// Backward page of one media kind, newest first. Bounds are inclusive.
pub fn page(
    conn: &Connection,
    dialog_id: DialogId,
    kind: MediaKind,
    min_id: Option<MessageId>,
    max_id: Option<MessageId>,
    limit: usize,
) -> Result<Vec<Message>> {
    let mut values = vec![
        Value::Integer(dialog_id),
        Value::Integer(i64::from(kind.as_i32())),
    ];
    let mut filter = String::new();
    if let Some(min) = min_id {
        values.push(Value::Integer(min));
        filter.push_str(&format!(" AND mid >= ?{}", values.len()));
    }
    if let Some(max) = max_id {
        values.push(Value::Integer(max));
        filter.push_str(&format!(" AND mid <= ?{}", values.len()));
    }
    values.push(Value::Integer(limit as i64));
    let sql = format!(
        "SELECT mid, data FROM media_index
         WHERE uid = ?1 AND type = ?2 AND mid > 0{filter}
         ORDER BY date DESC, mid DESC LIMIT ?{}",
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(mid, data)| match murmur_types::codec::decode::<Message>(&data) {
            Ok(mut message) => {
                message.id = mid;
                Some(message)
            }
            Err(e) => {
                tracing::warn!(mid, "Skipping undecodable media row: {e}");
                None
            }
        })
        .collect())
}

pub fn delete(conn: &Connection, ids: &[MessageId]) -> Result<usize> {
    execute_chunked(conn, "DELETE FROM media_index WHERE mid IN ({ids})", &[], ids)
}

pub fn delete_dialog(conn: &Connection, dialog_id: DialogId) -> Result<usize> {
    Ok(conn.execute("DELETE FROM media_index WHERE uid = ?1", [dialog_id])?)
}

pub fn rekey(conn: &Connection, old_id: MessageId, new_id: MessageId) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE OR REPLACE media_index SET mid = ?2 WHERE mid = ?1",
        params![old_id, new_id],
    )?)
}

// ============================================================
// media_counts
// ============================================================

/// Cached count, `None` when it was never fetched.
pub fn get_count(conn: &Connection, dialog_id: DialogId, kind: MediaKind) -> Result<Option<i32>> {
    let count = conn
        .query_row(
            "SELECT count FROM media_counts WHERE uid = ?1 AND type = ?2",
            params![dialog_id, kind.as_i32()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count)
}

pub fn put_count(conn: &Connection, dialog_id: DialogId, kind: MediaKind, count: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO media_counts (uid, type, count) VALUES (?1, ?2, ?3)",
        params![dialog_id, kind.as_i32(), count],
    )?;
    Ok(())
}

/// Add `delta` to an existing count. Returns whether a row was there to update.
pub fn bump_count(
    conn: &Connection,
    dialog_id: DialogId,
    kind: MediaKind,
    delta: i32,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE media_counts SET count = count + ?3 WHERE uid = ?1 AND type = ?2",
        params![dialog_id, kind.as_i32(), delta],
    )?;
    Ok(updated > 0)
}

/// Forget every cached count of the given dialogs.
pub fn clear_counts(conn: &Connection, dialog_ids: &[DialogId]) -> Result<usize> {
    execute_chunked(conn, "DELETE FROM media_counts WHERE uid IN ({ids})", &[], dialog_ids)
}
