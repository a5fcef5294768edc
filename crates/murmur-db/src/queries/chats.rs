//! Cached group chats and channels.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::codec;
use murmur_types::records::Chat;

use crate::sql::query_chunked;
use crate::Result;

pub fn put(conn: &Connection, chat: &Chat) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO chats (uid, name, data) VALUES (?1, ?2, ?3)",
        params![chat.id, chat.title.to_lowercase(), codec::encode(chat)?],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: i32) -> Result<Option<Chat>> {
    let data: Option<Vec<u8>> = conn
        .query_row("SELECT data FROM chats WHERE uid = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(data.map(|d| codec::decode(&d)).transpose()?)
}

pub fn get_many(conn: &Connection, ids: &[i64]) -> Result<Vec<Chat>> {
    let rows = query_chunked(
        conn,
        "SELECT uid, data FROM chats WHERE uid IN ({ids})",
        &[],
        ids,
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|(uid, data)| match codec::decode::<Chat>(&data) {
            Ok(chat) => Some(chat),
            Err(e) => {
                tracing::warn!(uid, "Skipping undecodable chat row: {e}");
                None
            }
        })
        .collect())
}

pub fn delete(conn: &Connection, id: i32) -> Result<()> {
    conn.execute("DELETE FROM chats WHERE uid = ?1", [id])?;
    Ok(())
}
