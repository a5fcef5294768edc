//! Dialog rows. Flags come from `dialog_settings` and are joined on read.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::records::Dialog;
use murmur_types::DialogId;

use crate::sql::query_chunked;
use crate::{Result, StorageError};

const SELECT: &str = "SELECT d.did, d.date, d.unread_count, d.last_mid, d.inbox_max, d.outbox_max,
        d.last_mid_i, d.unread_count_i, d.pts, d.date_i, COALESCE(s.flags, 0)
     FROM dialogs d LEFT JOIN dialog_settings s ON s.did = d.did";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dialog> {
    Ok(Dialog {
        id: row.get(0)?,
        date: row.get(1)?,
        unread_count: row.get(2)?,
        last_message_id: row.get(3)?,
        inbox_max: row.get(4)?,
        outbox_max: row.get(5)?,
        last_important_id: row.get(6)?,
        unread_important: row.get(7)?,
        pts: row.get(8)?,
        date_important: row.get(9)?,
        flags: row.get(10)?,
    })
}

/// Insert or replace the aggregate columns of a dialog (flags are not written).
pub fn upsert(conn: &Connection, dialog: &Dialog) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dialogs
            (did, date, unread_count, last_mid, inbox_max, outbox_max,
             last_mid_i, unread_count_i, pts, date_i)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            dialog.id,
            dialog.date,
            dialog.unread_count,
            dialog.last_message_id,
            dialog.inbox_max,
            dialog.outbox_max,
            dialog.last_important_id,
            dialog.unread_important,
            dialog.pts,
            dialog.date_important,
        ],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, dialog_id: DialogId) -> Result<Option<Dialog>> {
    let dialog = conn
        .query_row(&format!("{SELECT} WHERE d.did = ?1"), [dialog_id], from_row)
        .optional()?;
    Ok(dialog)
}

pub fn get(conn: &Connection, dialog_id: DialogId) -> Result<Dialog> {
    find(conn, dialog_id)?.ok_or_else(|| StorageError::NotFound(format!("dialog {dialog_id}")))
}

pub fn get_many(conn: &Connection, ids: &[DialogId]) -> Result<Vec<Dialog>> {
    query_chunked(conn, &format!("{SELECT} WHERE d.did IN ({{ids}})"), &[], ids, from_row)
}

/// Dialogs ordered by last activity, newest first.
pub fn list(conn: &Connection, offset: usize, count: usize) -> Result<Vec<Dialog>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} ORDER BY d.date DESC, d.did DESC LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt
        .query_map(params![count as i64, offset as i64], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Dialogs with unread messages that are not muted.
pub fn unread_unmuted(conn: &Connection) -> Result<Vec<Dialog>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE d.unread_count > 0 AND (COALESCE(s.flags, 0) & 1) = 0
         ORDER BY d.date DESC"
    ))?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(conn: &Connection, dialog_id: DialogId) -> Result<usize> {
    Ok(conn.execute("DELETE FROM dialogs WHERE did = ?1", [dialog_id])?)
}

/// Raise the inbox/outbox read maxima; they never move backwards.
pub fn raise_read_max(
    conn: &Connection,
    dialog_id: DialogId,
    inbox_max: i32,
    outbox_max: i32,
) -> Result<()> {
    conn.execute(
        "UPDATE dialogs SET inbox_max = MAX(inbox_max, ?2), outbox_max = MAX(outbox_max, ?3)
         WHERE did = ?1",
        params![dialog_id, inbox_max, outbox_max],
    )?;
    Ok(())
}

/// Point whichever stream pointer references `old_id` at `new_id`.
pub fn repoint(conn: &Connection, old_id: i64, new_id: i64) -> Result<usize> {
    let ordinary = conn.execute(
        "UPDATE dialogs SET last_mid = ?2 WHERE last_mid = ?1",
        params![old_id, new_id],
    )?;
    let important = conn.execute(
        "UPDATE dialogs SET last_mid_i = ?2 WHERE last_mid_i = ?1",
        params![old_id, new_id],
    )?;
    Ok(ordinary + important)
}

/// Channel delta-sequence cursor, zero when the dialog is unknown.
pub fn get_pts(conn: &Connection, dialog_id: DialogId) -> Result<i32> {
    let pts = conn
        .query_row("SELECT pts FROM dialogs WHERE did = ?1", [dialog_id], |row| row.get(0))
        .optional()?;
    Ok(pts.unwrap_or(0))
}

pub fn set_pts(conn: &Connection, dialog_id: DialogId, pts: i32) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE dialogs SET pts = ?2 WHERE did = ?1",
        params![dialog_id, pts],
    )?)
}
