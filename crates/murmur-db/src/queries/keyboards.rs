//! Latest bot reply keyboard per dialog.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::records::BotKeyboard;
use murmur_types::{DialogId, MessageId};

use crate::sql::query_chunked;
use crate::Result;

pub fn get(conn: &Connection, dialog_id: DialogId) -> Result<Option<BotKeyboard>> {
    let keyboard = conn
        .query_row(
            "SELECT uid, mid, info FROM bot_keyboard WHERE uid = ?1",
            [dialog_id],
            |row| {
                Ok(BotKeyboard {
                    dialog_id: row.get(0)?,
                    message_id: row.get(1)?,
                    payload: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(keyboard)
}

/// Store `keyboard` unless the dialog already has one from a newer message.
/// Returns whether the stored keyboard changed.
pub fn put_if_newer(conn: &Connection, keyboard: &BotKeyboard) -> Result<bool> {
    if let Some(current) = get(conn, keyboard.dialog_id)? {
        if current.message_id > keyboard.message_id {
            return Ok(false);
        }
    }
    conn.execute(
        "INSERT OR REPLACE INTO bot_keyboard (uid, mid, info) VALUES (?1, ?2, ?3)",
        params![keyboard.dialog_id, keyboard.message_id, keyboard.payload],
    )?;
    Ok(true)
}

/// Remove keyboards attached to any of `ids`. Returns the affected dialogs.
pub fn delete_for_messages(conn: &Connection, ids: &[MessageId]) -> Result<Vec<DialogId>> {
    let dialogs = query_chunked(
        conn,
        "SELECT uid FROM bot_keyboard WHERE mid IN ({ids})",
        &[],
        ids,
        |row| row.get::<_, i64>(0),
    )?;
    for dialog_id in &dialogs {
        conn.execute("DELETE FROM bot_keyboard WHERE uid = ?1", [dialog_id])?;
    }
    Ok(dialogs)
}

pub fn delete_dialog(conn: &Connection, dialog_id: DialogId) -> Result<()> {
    conn.execute("DELETE FROM bot_keyboard WHERE uid = ?1", [dialog_id])?;
    Ok(())
}

pub fn rekey(conn: &Connection, old_id: MessageId, new_id: MessageId) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE bot_keyboard SET mid = ?2 WHERE mid = ?1",
        params![old_id, new_id],
    )?)
}
