//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only;
//! each step runs in its own transaction and bumps the version on commit.
//! The store never refuses to open: an unreadable or impossible version record
//! drops the cache tables and rebuilds them from the current schema.

use rusqlite::Connection;

use crate::{holes, in_transaction, schema, session, Result, StorageError, SCHEMA_VERSION};

/// Follow-up work produced by a migration step.
///
/// Side jobs run on the task queue after open, best effort: failures are
/// logged and swallowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideJob {
    /// Copy legacy `notify2_<dialog>` mute preferences into `dialog_settings`.
    BackfillDialogSettings,
}

/// What [`run`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub from_version: u32,
    pub to_version: u32,
    /// The version record was unusable and the cache was rebuilt.
    pub rebuilt: bool,
    pub side_jobs: Vec<SideJob>,
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<Outcome> {
    let current_version: u32 = match read_version(conn) {
        Ok(version) => version,
        Err(e) => {
            tracing::warn!("Unreadable schema version ({e}), rebuilding cache");
            return rebuild(conn, 0);
        }
    };

    let mut outcome = Outcome {
        from_version: current_version,
        to_version: SCHEMA_VERSION,
        ..Outcome::default()
    };

    if current_version == 0 {
        if has_cache_tables(conn)? {
            tracing::warn!("Schema version missing on a populated database, rebuilding cache");
            return rebuild(conn, 0);
        }
        // Fresh database: apply the current schema in one shot
        tracing::info!("Initializing database schema v{SCHEMA_VERSION}");
        install(conn, schema::SCHEMA_CURRENT, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        outcome.side_jobs = match upgrade_to(conn, SCHEMA_VERSION) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!("Upgrade from v{current_version} failed ({e}), rebuilding cache");
                return rebuild(conn, current_version);
            }
        };
    } else if current_version > SCHEMA_VERSION {
        tracing::warn!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}, rebuilding cache"
        );
        return rebuild(conn, current_version);
    }

    session::ensure_row(conn)?;
    Ok(outcome)
}

/// Create the version-1 layout on an empty database.
///
/// Used to reproduce databases written by old clients.
pub fn install_base(conn: &Connection) -> Result<()> {
    install(conn, schema::SCHEMA_V1, 1)
}

/// Apply every step from the stored version up to `target`.
pub fn upgrade_to(conn: &Connection, target: u32) -> Result<Vec<SideJob>> {
    let current = read_version(conn)?;
    if current == 0 || target > SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "cannot upgrade from v{current} to v{target}"
        )));
    }

    let mut jobs = Vec::new();
    for version in (current + 1)..=target {
        tracing::info!("Running migration to v{version}");
        let job = in_transaction(conn, |tx| {
            let job = run_migration(tx, version)?;
            tx.pragma_update(None, "user_version", version)?;
            Ok(job)
        })?;
        jobs.extend(job);
    }
    Ok(jobs)
}

/// Read `PRAGMA user_version`.
pub fn read_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version)
        .map_err(|_| StorageError::Migration(format!("invalid schema version {version}")))
}

fn install(conn: &Connection, ddl: &str, version: u32) -> Result<()> {
    in_transaction(conn, |tx| {
        tx.execute_batch(ddl)?;
        session::ensure_row(tx)?;
        tx.pragma_update(None, "user_version", version)?;
        Ok(())
    })
}

/// Drop every cache table and recreate the current schema.
fn rebuild(conn: &Connection, from_version: u32) -> Result<Outcome> {
    in_transaction(conn, |tx| {
        for table in schema::TABLES {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        }
        Ok(())
    })?;
    install(conn, schema::SCHEMA_CURRENT, SCHEMA_VERSION)?;
    Ok(Outcome {
        from_version,
        to_version: SCHEMA_VERSION,
        rebuilt: true,
        side_jobs: Vec::new(),
    })
}

fn has_cache_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('messages', 'dialogs')",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: u32) -> Result<Option<SideJob>> {
    match version {
        2 => {
            conn.execute_batch(schema::MIGRATION_V2)?;
            Ok(Some(SideJob::BackfillDialogSettings))
        }
        3 => batch(conn, schema::MIGRATION_V3),
        4 => batch(conn, schema::MIGRATION_V4),
        5 => batch(conn, schema::MIGRATION_V5),
        6 => batch(conn, schema::MIGRATION_V6),
        7 => {
            conn.execute_batch(schema::MIGRATION_V7)?;
            seed_message_holes(conn)?;
            Ok(None)
        }
        8 => batch(conn, schema::MIGRATION_V8),
        _ => Err(StorageError::Migration(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

fn batch(conn: &Connection, ddl: &str) -> Result<Option<SideJob>> {
    conn.execute_batch(ddl)?;
    Ok(None)
}

/// Dialogs cached before the ledger existed are unknown below their last message.
fn seed_message_holes(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT did, last_mid FROM dialogs WHERE last_mid > 0")?;
    let dialogs = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (did, last_mid) in dialogs {
        holes::seed(conn, &holes::HoleKey::messages(did), last_mid)?;
    }
    Ok(())
}

/// Execute a side job. Returns the number of rows it touched.
pub fn run_side_job(conn: &Connection, job: SideJob) -> Result<usize> {
    match job {
        SideJob::BackfillDialogSettings => backfill_dialog_settings(conn),
    }
}

/// Copy legacy mute preferences (`notify2_<did>` = 2) into `dialog_settings`.
///
/// Malformed keys are skipped with a warning.
pub fn backfill_dialog_settings(conn: &Connection) -> Result<usize> {
    let mut stmt =
        conn.prepare("SELECT key, value FROM legacy_prefs WHERE key LIKE 'notify2\\_%' ESCAPE '\\'")?;
    let prefs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut written = 0;
    in_transaction(conn, |tx| {
        for (key, value) in &prefs {
            if *value != 2 {
                continue;
            }
            let Some(did) = key
                .strip_prefix("notify2_")
                .and_then(|s| s.parse::<i64>().ok())
            else {
                tracing::warn!("Skipping malformed legacy preference key {key:?}");
                continue;
            };
            tx.execute(
                "INSERT OR REPLACE INTO dialog_settings (did, flags) VALUES (?1, ?2)",
                rusqlite::params![did, murmur_types::records::dialog_flags::MUTED],
            )?;
            written += 1;
        }
        Ok(())
    })?;
    Ok(written)
}

/// Describe the schema as sorted lines: one per column and one per index.
///
/// Two databases with equal fingerprints have the same tables, columns
/// (type, nullability, default, key position) and indices.
pub fn schema_fingerprint(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut lines = Vec::new();
    for table in &tables {
        let mut cols = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let rows = cols
            .query_map([], |row| {
                Ok(format!(
                    "column {table} #{} {} {} notnull={} default={:?} pk={}",
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        lines.extend(rows);

        let mut idx = conn.prepare(&format!("PRAGMA index_list({table})"))?;
        let indices = idx
            .query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (name, unique) in indices {
            let mut info = conn.prepare(&format!("PRAGMA index_info({name})"))?;
            let columns = info
                .query_map([], |row| row.get::<_, Option<String>>(2))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .map(|c| c.unwrap_or_default())
                .collect::<Vec<_>>()
                .join(",");
            lines.push(format!("index {table} {name} unique={unique} ({columns})"));
        }
    }
    lines.sort();
    Ok(lines)
}

/// Row count of every cache table, in [`schema::TABLES`] order.
pub fn row_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    schema::TABLES
        .iter()
        .map(|table| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok((*table, count))
        })
        .collect()
}
