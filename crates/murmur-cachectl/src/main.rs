//! murmur-cachectl: inspect and maintain the on-device message cache.
//!
//! Opens the same database the client uses (through the storage queue, so
//! migrations and their side jobs run exactly as they would in the app) and
//! prints JSON to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;

use murmur_db::config::StoreConfig;
use murmur_db::consistency;
use murmur_db::files::NoopFileManager;
use murmur_db::holes::HoleKey;
use murmur_db::queries::dialogs;
use murmur_db::storage::Storage;
use murmur_db::{migrations, SCHEMA_VERSION};
use murmur_types::records::MediaKind;
use murmur_types::DialogId;

#[derive(Parser, Debug)]
#[command(name = "murmur-cachectl", about = "Inspect the message cache")]
struct Cli {
    /// Database file (defaults to the configured data directory).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the database, migrating it if needed, and report the outcome.
    Migrate,
    /// Schema version and row count of every table.
    Stats,
    /// List the holes of one dialog.
    Holes {
        #[arg(long, allow_hyphen_values = true)]
        dialog: DialogId,
        #[arg(long, value_enum, default_value_t = ScopeArg::Messages)]
        scope: ScopeArg,
        /// Media kind, for `--scope media`.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Compare a dialog's stored aggregates with its message rows.
    Check {
        #[arg(long, allow_hyphen_values = true)]
        dialog: DialogId,
    },
    /// Print a page of the dialog list.
    Dialogs {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
    /// Delete the database and start over.
    Reset {
        /// Required; the cache cannot be recovered.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Messages,
    Important,
    Media,
    AllMedia,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    PhotoVideo,
    File,
    Audio,
    Url,
    Music,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::PhotoVideo => MediaKind::PhotoVideo,
            KindArg::File => MediaKind::File,
            KindArg::Audio => MediaKind::Audio,
            KindArg::Url => MediaKind::Url,
            KindArg::Music => MediaKind::Music,
        }
    }
}

fn hole_key(dialog: DialogId, scope: ScopeArg, kind: Option<KindArg>) -> anyhow::Result<HoleKey> {
    Ok(match scope {
        ScopeArg::Messages => HoleKey::messages(dialog),
        ScopeArg::Important => HoleKey::important(dialog),
        ScopeArg::AllMedia => HoleKey::all_media(dialog),
        ScopeArg::Media => match kind {
            Some(kind) => HoleKey::media(dialog, kind.into()),
            None => bail!("--scope media needs --kind"),
        },
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = StoreConfig::load().context("loading config.toml")?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("murmur={}", config.logging.log_level).parse()?),
        )
        .init();

    let path = cli.db.clone().unwrap_or_else(|| config.database_path());
    info!(path = %path.display(), "Opening cache");
    let storage = Storage::open_path(path, &config, Arc::new(NoopFileManager))?;

    let output = match cli.command {
        Commands::Migrate => {
            let opened = storage.opened();
            json!({
                "from_version": opened.from_version,
                "to_version": opened.to_version,
                "rebuilt": opened.rebuilt,
                "side_jobs": opened.side_jobs.iter().map(|job| format!("{job:?}")).collect::<Vec<_>>(),
            })
        }
        Commands::Stats => {
            let counts = storage
                .run("row_counts", |w| migrations::row_counts(w.conn()))
                .await?;
            let tables: serde_json::Map<String, serde_json::Value> = counts
                .into_iter()
                .map(|(table, rows)| (table.to_string(), json!(rows)))
                .collect();
            json!({ "schema_version": SCHEMA_VERSION, "tables": tables })
        }
        Commands::Holes {
            dialog,
            scope,
            kind,
        } => {
            let key = hole_key(dialog, scope, kind)?;
            let holes = storage.holes(key).await?;
            let rows: Vec<_> = holes
                .iter()
                .map(|h| {
                    json!({
                        "start": h.start,
                        "end": h.end,
                        "kind": h.media.map(|k| k.as_i32()),
                        "sentinel": h.is_sentinel(),
                    })
                })
                .collect();
            json!({ "dialog": dialog, "holes": rows })
        }
        Commands::Check { dialog } => {
            let (stored, derived) = storage
                .run("check", move |w| {
                    Ok((dialogs::find(w.conn(), dialog)?, consistency::derive(w.conn(), dialog)?))
                })
                .await?;
            let Some(stored) = stored else {
                bail!("dialog {dialog} is not cached");
            };
            let consistent = stored.unread_count == derived.unread_count
                && stored.unread_important == derived.unread_important
                && stored.last_message_id == derived.last_message_id;
            json!({
                "dialog": dialog,
                "consistent": consistent,
                "stored": {
                    "unread": stored.unread_count,
                    "unread_important": stored.unread_important,
                    "last_message_id": stored.last_message_id,
                },
                "derived": {
                    "unread": derived.unread_count,
                    "unread_important": derived.unread_important,
                    "last_message_id": derived.last_message_id,
                },
            })
        }
        Commands::Dialogs { offset, count } => {
            let page = storage.get_dialogs(offset, count).await?;
            let rows: Vec<_> = page
                .dialogs
                .iter()
                .map(|d| {
                    json!({
                        "id": d.id,
                        "date": d.date,
                        "last_message_id": d.last_message_id,
                        "unread": d.unread_count,
                        "muted": d.is_muted(),
                        "pts": d.pts,
                    })
                })
                .collect();
            json!({ "dialogs": rows, "users": page.peers.users.len(), "chats": page.peers.chats.len() })
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to delete the cache without --yes");
            }
            let outcome = storage.reset().await?;
            json!({ "reset": true, "to_version": outcome.to_version })
        }
    };

    storage.close();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
