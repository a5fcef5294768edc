//! State owned by the storage worker thread.
//!
//! A [`Worker`] is built on the worker thread and never leaves it; every unit
//! of work receives it as `&mut Worker`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;

use murmur_types::events::EventType;

use crate::config::{LimitsConfig, StoreConfig};
use crate::events::EventBus;
use crate::files::FileManager;
use crate::migrations::{self, Outcome};
use crate::session::SessionState;
use crate::{configure_with, Result, StorageError};

/// Where the database lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
}

pub struct Worker {
    conn: Connection,
    location: Location,
    busy_timeout_ms: u32,
    cache_size_kib: u32,
    /// Sync cursors; see [`SessionState`].
    pub session: SessionState,
    pub events: EventBus,
    pub files: Arc<dyn FileManager>,
    pub limits: LimitsConfig,
}

impl Worker {
    /// Open the database, bring the schema up to date and load the session.
    pub fn open(
        location: Location,
        config: &StoreConfig,
        events: EventBus,
        files: Arc<dyn FileManager>,
    ) -> Result<(Self, Outcome)> {
        let busy_timeout_ms = config.database.busy_timeout_ms;
        let cache_size_kib = config.database.cache_size_kib;
        let (conn, outcome, session) = connect(&location, busy_timeout_ms, cache_size_kib)?;
        let worker = Worker {
            conn,
            location,
            busy_timeout_ms,
            cache_size_kib,
            session,
            events,
            files,
            limits: config.limits.clone(),
        };
        Ok((worker, outcome))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Connection and session cursors borrowed together.
    pub fn session_mut(&mut self) -> (&Connection, &mut SessionState) {
        (&self.conn, &mut self.session)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        self.events.emit(event_type, payload);
    }

    /// Close the connection and open it again, optionally deleting the
    /// database first. The session cursors are reloaded from disk.
    pub fn reopen(&mut self, wipe: bool) -> Result<Outcome> {
        let placeholder = Connection::open_in_memory()?;
        let old = std::mem::replace(&mut self.conn, placeholder);
        if let Err((_, e)) = old.close() {
            tracing::warn!("Closing database before reopen failed: {e}");
        }

        if wipe {
            self.session.reset();
            if let Location::File(path) = &self.location {
                remove_database_files(path)?;
            }
        }

        let (conn, outcome, session) =
            connect(&self.location, self.busy_timeout_ms, self.cache_size_kib)?;
        self.conn = conn;
        self.session = session;
        Ok(outcome)
    }
}

/// Open and migrate, starting over with an empty file when the existing
/// one cannot be configured or migrated.
fn connect(
    location: &Location,
    busy_timeout_ms: u32,
    cache_size_kib: u32,
) -> Result<(Connection, Outcome, SessionState)> {
    let path = match location {
        Location::Memory => {
            return connect_once(Connection::open_in_memory()?, busy_timeout_ms, cache_size_kib)
        }
        Location::File(path) => path,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let first = Connection::open(path)
        .map_err(StorageError::from)
        .and_then(|conn| connect_once(conn, busy_timeout_ms, cache_size_kib));
    match first {
        Ok(opened) => Ok(opened),
        Err(e) => {
            tracing::error!(path = %path.display(), "Database unusable ({e}), recreating it");
            remove_database_files(path)?;
            let (conn, mut outcome, session) =
                connect_once(Connection::open(path)?, busy_timeout_ms, cache_size_kib)?;
            outcome.rebuilt = true;
            Ok((conn, outcome, session))
        }
    }
}

fn connect_once(
    conn: Connection,
    busy_timeout_ms: u32,
    cache_size_kib: u32,
) -> Result<(Connection, Outcome, SessionState)> {
    configure_with(&conn, busy_timeout_ms, cache_size_kib)?;
    let outcome = migrations::run(&conn)?;
    let session = SessionState::load(&conn)?;
    Ok((conn, outcome, session))
}

/// Delete the database file and its WAL/shared-memory companions.
fn remove_database_files(path: &Path) -> Result<()> {
    let mut companions = Vec::with_capacity(3);
    companions.push(path.to_path_buf());
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        companions.push(PathBuf::from(name));
    }
    for file in companions {
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::info!(path = %file.display(), "Removed database file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
