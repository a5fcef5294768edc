//! Cache of already-uploaded local files, keyed by a hash of the path.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::records::SentFile;

use crate::Result;

/// Row key for a local path: hex of `blake3(path)`.
pub fn path_key(path: &str) -> String {
    hex::encode(blake3::hash(path.as_bytes()).as_bytes())
}

pub fn put(conn: &Connection, file: &SentFile) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sent_files (uid, type, data) VALUES (?1, ?2, ?3)",
        params![path_key(&file.path), file.kind, file.payload],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, path: &str, kind: i32) -> Result<Option<SentFile>> {
    let payload: Option<Vec<u8>> = conn
        .query_row(
            "SELECT data FROM sent_files WHERE uid = ?1 AND type = ?2",
            params![path_key(path), kind],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload.map(|payload| SentFile {
        path: path.to_string(),
        kind,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_by_path_and_kind() {
        let conn = crate::open_memory().expect("open test db");
        let file = SentFile {
            path: "/sdcard/DCIM/cat.jpg".into(),
            kind: 1,
            payload: vec![4, 5, 6],
        };
        put(&conn, &file).expect("put");

        assert_eq!(get(&conn, &file.path, 1).expect("get"), Some(file.clone()));
        assert!(get(&conn, &file.path, 2).expect("get").is_none());
        assert!(get(&conn, "/sdcard/other.jpg", 1).expect("get").is_none());
        assert_eq!(path_key(&file.path).len(), 64);
    }
}
