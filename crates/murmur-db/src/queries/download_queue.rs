//! Auto-download queue, one row per (file id, kind bit).

use rusqlite::{params, Connection};

use murmur_types::records::DownloadItem;

use crate::sql::execute_chunked;
use crate::Result;

pub fn put(conn: &Connection, item: &DownloadItem) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO download_queue (uid, type, date, data) VALUES (?1, ?2, ?3, ?4)",
        params![item.id, item.kind, item.date, item.payload],
    )?;
    Ok(())
}

/// Remove finished downloads. With `move_to_back` the rows stay queued but
/// sort after every other row of the kind (`date = min(date) - 1`).
pub fn remove(conn: &Connection, ids: &[i64], kind: u32, move_to_back: bool) -> Result<usize> {
    if move_to_back {
        let min_date: Option<i64> = conn.query_row(
            "SELECT MIN(date) FROM download_queue WHERE type = ?1",
            [kind],
            |row| row.get(0),
        )?;
        let Some(min_date) = min_date else {
            return Ok(0);
        };
        execute_chunked(
            conn,
            "UPDATE download_queue SET date = ?1 WHERE type = ?2 AND uid IN ({ids})",
            &[&(min_date - 1), &kind],
            ids,
        )
    } else {
        execute_chunked(
            conn,
            "DELETE FROM download_queue WHERE type = ?1 AND uid IN ({ids})",
            &[&kind],
            ids,
        )
    }
}

/// Drop every row whose kind bit is in `kind_mask`; a zero mask drops everything.
pub fn clear(conn: &Connection, kind_mask: u32) -> Result<usize> {
    let removed = if kind_mask == 0 {
        conn.execute("DELETE FROM download_queue", [])?
    } else {
        conn.execute(
            "DELETE FROM download_queue WHERE (type & ?1) != 0",
            [kind_mask],
        )?
    };
    Ok(removed)
}

/// Most recent rows of one kind.
pub fn top(conn: &Connection, kind: u32, limit: usize) -> Result<Vec<DownloadItem>> {
    let mut stmt = conn.prepare(
        "SELECT uid, type, date, data FROM download_queue
         WHERE type = ?1 ORDER BY date DESC, uid DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![kind, limit as i64], |row| {
            Ok(DownloadItem {
                id: row.get(0)?,
                kind: row.get(1)?,
                date: row.get(2)?,
                payload: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM download_queue", [], |row| row.get(0))?)
}
