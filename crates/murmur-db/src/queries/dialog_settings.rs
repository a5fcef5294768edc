//! Per-dialog notification flags.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::records::dialog_flags;
use murmur_types::DialogId;

use crate::Result;

/// Flags of a dialog, zero when none were ever set.
pub fn get(conn: &Connection, dialog_id: DialogId) -> Result<i64> {
    let flags = conn
        .query_row(
            "SELECT flags FROM dialog_settings WHERE did = ?1",
            [dialog_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flags.unwrap_or(0))
}

pub fn set(conn: &Connection, dialog_id: DialogId, flags: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO dialog_settings (did, flags) VALUES (?1, ?2)",
        params![dialog_id, flags],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, dialog_id: DialogId) -> Result<()> {
    conn.execute("DELETE FROM dialog_settings WHERE did = ?1", [dialog_id])?;
    Ok(())
}

/// Every muted dialog id.
pub fn muted(conn: &Connection) -> Result<Vec<DialogId>> {
    let mut stmt =
        conn.prepare("SELECT did FROM dialog_settings WHERE (flags & ?1) != 0 ORDER BY did")?;
    let ids = stmt
        .query_map([dialog_flags::MUTED], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_muted() {
        let conn = crate::open_memory().expect("open test db");
        assert_eq!(get(&conn, 3).expect("get"), 0);

        set(&conn, 3, dialog_flags::MUTED).expect("set");
        set(&conn, 4, 0).expect("set");
        assert_eq!(get(&conn, 3).expect("get"), dialog_flags::MUTED);
        assert_eq!(muted(&conn).expect("muted"), vec![3]);

        delete(&conn, 3).expect("delete");
        assert!(muted(&conn).expect("muted").is_empty());
    }
}
