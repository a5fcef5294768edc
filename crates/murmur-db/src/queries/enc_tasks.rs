//! Scheduled deletions of self-destructing secret-chat messages.

use rusqlite::{params, Connection};

use murmur_types::{MessageId, Timestamp};

use crate::sql::execute_chunked;
use crate::Result;

pub fn schedule(conn: &Connection, mid: MessageId, date: Timestamp) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO enc_tasks (mid, date) VALUES (?1, ?2)",
        params![mid, date],
    )?;
    Ok(())
}

/// Earliest due date and every message scheduled for it.
pub fn next_batch(conn: &Connection) -> Result<Option<(Timestamp, Vec<MessageId>)>> {
    let date: Option<Timestamp> =
        conn.query_row("SELECT MIN(date) FROM enc_tasks", [], |row| row.get(0))?;
    let Some(date) = date else {
        return Ok(None);
    };
    let mut stmt = conn.prepare("SELECT mid FROM enc_tasks WHERE date = ?1 ORDER BY mid")?;
    let ids = stmt
        .query_map([date], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Some((date, ids)))
}

pub fn delete(conn: &Connection, ids: &[MessageId]) -> Result<usize> {
    execute_chunked(conn, "DELETE FROM enc_tasks WHERE mid IN ({ids})", &[], ids)
}
