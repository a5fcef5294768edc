//! Cached users.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::codec;
use murmur_types::records::User;

use crate::sql::query_chunked;
use crate::Result;

/// Insert or replace a user. The `name` column holds the search key.
pub fn put(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO users (uid, name, status, data) VALUES (?1, ?2, ?3, ?4)",
        params![user.id, user.search_name(), user.status, codec::encode(user)?],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: i32) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT data, status FROM users WHERE uid = ?1",
            [id],
            |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i32>(1)?)),
        )
        .optional()?;
    match row {
        Some((data, status)) => {
            let mut user: User = codec::decode(&data)?;
            user.status = status;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}

pub fn get_many(conn: &Connection, ids: &[i64]) -> Result<Vec<User>> {
    let rows = query_chunked(
        conn,
        "SELECT uid, data, status FROM users WHERE uid IN ({ids})",
        &[],
        ids,
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i32>(2)?,
            ))
        },
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|(uid, data, status)| match codec::decode::<User>(&data) {
            Ok(mut user) => {
                user.status = status;
                Some(user)
            }
            Err(e) => {
                tracing::warn!(uid, "Skipping undecodable user row: {e}");
                None
            }
        })
        .collect())
}

/// Update the presence column. Returns whether the user was known.
pub fn set_status(conn: &Connection, id: i32, status: i32) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE users SET status = ?2 WHERE uid = ?1",
        params![id, status],
    )?;
    Ok(updated > 0)
}

/// Users whose search key contains `query` (case-insensitive).
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<i32>> {
    let pattern = format!("%{}%", query.to_lowercase());
    let mut stmt =
        conn.prepare("SELECT uid FROM users WHERE name LIKE ?1 ORDER BY uid LIMIT ?2")?;
    let ids = stmt
        .query_map(params![pattern, limit as i64], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}
