//! Blocked-user list.

use rusqlite::Connection;

use crate::Result;

/// Block users. With `replace_all` the list is replaced wholesale.
pub fn put(conn: &Connection, user_ids: &[i32], replace_all: bool) -> Result<()> {
    if replace_all {
        conn.execute("DELETE FROM blocked_users", [])?;
    }
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO blocked_users (uid) VALUES (?1)")?;
    for id in user_ids {
        stmt.execute([id])?;
    }
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i32) -> Result<()> {
    conn.execute("DELETE FROM blocked_users WHERE uid = ?1", [user_id])?;
    Ok(())
}

pub fn list(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare("SELECT uid FROM blocked_users ORDER BY uid")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}
