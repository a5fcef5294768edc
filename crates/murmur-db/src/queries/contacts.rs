//! Address-book contacts.

use rusqlite::{params, Connection};

use murmur_types::records::Contact;

use crate::sql::execute_chunked;
use crate::Result;

/// Insert or replace contacts. With `replace_all` the table is cleared first.
pub fn put(conn: &Connection, contacts: &[Contact], replace_all: bool) -> Result<()> {
    if replace_all {
        conn.execute("DELETE FROM contacts", [])?;
    }
    let mut stmt = conn.prepare("INSERT OR REPLACE INTO contacts (uid, mutual) VALUES (?1, ?2)")?;
    for contact in contacts {
        stmt.execute(params![contact.user_id, contact.mutual])?;
    }
    Ok(())
}

pub fn delete(conn: &Connection, user_ids: &[i64]) -> Result<usize> {
    execute_chunked(conn, "DELETE FROM contacts WHERE uid IN ({ids})", &[], user_ids)
}

pub fn list(conn: &Connection) -> Result<Vec<Contact>> {
    let mut stmt = conn.prepare("SELECT uid, mutual FROM contacts ORDER BY uid")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Contact {
                user_id: row.get(0)?,
                mutual: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
