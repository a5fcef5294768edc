//! Store configuration.
//!
//! Read from `config.toml` in the data directory (`$MURMUR_DATA_DIR` or the
//! platform default). Every field has a default, so a missing file or a
//! partial file is fine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database location and SQLite tuning.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Query and queue limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Database file name inside the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// SQLite busy timeout.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
    /// SQLite page cache size.
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,
}

/// Limits applied by storage operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-subscriber event buffer.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Media older than this is never queued for auto-download.
    #[serde(default = "default_auto_download_window")]
    pub auto_download_window_secs: i64,
    /// Rows returned per download-queue request.
    #[serde(default = "default_download_queue_batch")]
    pub download_queue_batch: usize,
    /// Messages returned by the unread preview.
    #[serde(default = "default_unread_preview_limit")]
    pub unread_preview_limit: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_database_file() -> String {
    "cache4.db".to_string()
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_cache_size_kib() -> u32 {
    8000
}

fn default_event_capacity() -> usize {
    1000
}

fn default_auto_download_window() -> i64 {
    murmur_types::AUTO_DOWNLOAD_WINDOW_SECS
}

fn default_download_queue_batch() -> usize {
    murmur_types::DOWNLOAD_QUEUE_BATCH
}

fn default_unread_preview_limit() -> usize {
    murmur_types::UNREAD_PREVIEW_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            database_file: default_database_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size_kib: default_cache_size_kib(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            auto_download_window_secs: default_auto_download_window(),
            download_queue_batch: default_download_queue_batch(),
            unread_preview_limit: default_unread_preview_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: StoreConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.database.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.database.data_dir)
        }
    }

    /// Full path of the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.database.database_file)
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("MURMUR_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            home_fallback("Library/Application Support/Murmur")
        }
        #[cfg(not(target_os = "macos"))]
        {
            home_fallback(".murmur")
        }
    }
}

/// Fallback home directory resolution.
fn home_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/murmur"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.database.database_file, "cache4.db");
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.limits.auto_download_window_secs, 86_400);
        assert_eq!(config.limits.download_queue_batch, 3);
        assert_eq!(config.limits.unread_preview_limit, 50);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = StoreConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: StoreConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.database.cache_size_kib, config.database.cache_size_kib);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: StoreConfig = toml::from_str(
            r#"
            [database]
            data_dir = "/var/lib/murmur"

            [limits]
            unread_preview_limit = 10
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.database.database_file, "cache4.db");
        assert_eq!(parsed.limits.unread_preview_limit, 10);
        assert_eq!(parsed.limits.event_capacity, 1000);
        assert_eq!(
            parsed.database_path(),
            PathBuf::from("/var/lib/murmur/cache4.db")
        );
    }
}
