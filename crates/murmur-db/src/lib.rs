//! # murmur-db
//!
//! Durable on-device cache for the messaging client.
//! One SQLite database (`cache4.db` under the data directory) owned by a
//! single worker thread; every read and write is a unit of work on the
//! [`queue::TaskQueue`].
//!
//! ## Layout
//!
//! - [`schema`] / [`migrations`]: versioned schema, forward-only upgrades
//! - [`holes`]: ledger of message-id ranges not known to be cached
//! - [`queries`]: per-table free functions over a `&Connection`
//! - [`consistency`]: dialog aggregates (unread counts, last-message pointer)
//! - [`ops`]: multi-table units of work executed on the worker
//! - [`storage`]: the public handle returned by [`storage::Storage::open`]
//!
//! ## Conventions
//!
//! - Message ids are composite ids (see [`murmur_types::ids`])
//! - All timestamps are Unix epoch seconds
//! - Schema version stored in `PRAGMA user_version`

pub mod config;
pub mod consistency;
pub mod events;
pub mod files;
pub mod holes;
pub mod migrations;
pub mod ops;
pub mod queries;
pub mod queue;
pub mod schema;
pub mod session;
pub mod sql;
pub mod storage;
pub mod worker;

use rusqlite::Connection;
use std::path::Path;

use murmur_types::codec::CodecError;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 8;

/// Storage error types.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("blocking call issued from the storage worker thread")]
    Reentrant,

    #[error("storage queue is closed")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Open or create the cache database at the given path.
///
/// Configures pragmas and brings the schema to [`SCHEMA_VERSION`]. Side jobs
/// produced by the upgrade are returned for the caller to schedule.
pub fn open(path: &Path) -> Result<(Connection, migrations::Outcome)> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    let outcome = migrations::run(&conn)?;
    Ok((conn, outcome))
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
pub fn configure(conn: &Connection) -> Result<()> {
    configure_with(conn, 5000, 8000)
}

/// Configure SQLite pragmas with explicit busy timeout and page cache size.
pub fn configure_with(conn: &Connection, busy_timeout_ms: u32, cache_size_kib: u32) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA cache_size = -{cache_size_kib};"
    ))?;
    Ok(())
}

/// Run `f` inside a transaction unless one is already open on `conn`.
///
/// Nested calls join the outer transaction. The transaction rolls back when
/// `f` fails.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    if !conn.is_autocommit() {
        return f(conn);
    }
    let tx = conn.unchecked_transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let conn = open_memory().expect("open");
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("get journal_mode");
        // In-memory databases use "memory" mode, not WAL
        assert!(mode == "wal" || mode == "memory");
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let conn = open_memory().expect("open");
        let result: Result<()> = in_transaction(&conn, |tx| {
            tx.execute("INSERT INTO blocked_users (uid) VALUES (5)", [])?;
            Err(StorageError::Constraint("abort".into()))
        });
        assert!(result.is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM blocked_users", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_in_transaction_nests() {
        let conn = open_memory().expect("open");
        in_transaction(&conn, |outer| {
            outer.execute("INSERT INTO blocked_users (uid) VALUES (1)", [])?;
            in_transaction(outer, |inner| {
                inner.execute("INSERT INTO blocked_users (uid) VALUES (2)", [])?;
                Ok(())
            })
        })
        .expect("nested transaction");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM blocked_users", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }
}
