//! Engine configuration via `tessera.toml`
//!
//! On first open a default `tessera.toml` is written to the data directory.
//! Edit it and restart to switch backends or resize the worker pool.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessera_core::{Error, Result};
use tessera_storage::{BackendKind, MySqlConfig, SqliteConfig};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// `[database]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend to use: `"sqlite"` or `"mysql"`.
    #[serde(rename = "type", default)]
    pub kind: BackendKind,
    /// Embedded backend settings.
    #[serde(default)]
    pub sqlite: SqliteConfig,
    /// Networked backend settings.
    #[serde(default)]
    pub mysql: MySqlConfig,
}

/// `[settings]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Log every repository call at debug level.
    #[serde(default)]
    pub debug: bool,
    /// Background worker threads for the async facade.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Queued background tasks before submissions are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Budget for timed reads, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_queue_depth() -> usize {
    4096
}

fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            worker_threads: default_worker_threads(),
            max_queue_depth: default_max_queue_depth(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Settings {
    /// Timed read budget as a Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Engine configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// [database]
/// type = "sqlite"
///
/// [database.sqlite]
/// filename = "playerdata.db"
///
/// [settings]
/// worker_threads = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesseraConfig {
    /// Backend selection and connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Engine tuning.
    #[serde(default)]
    pub settings: Settings,
}

impl TesseraConfig {
    /// Check values serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-sized worker pool, queue or MySQL pool.
    pub fn validate(&self) -> Result<()> {
        if self.settings.worker_threads == 0 {
            return Err(Error::Config(
                "settings.worker_threads must be at least 1".to_string(),
            ));
        }
        if self.settings.max_queue_depth == 0 {
            return Err(Error::Config(
                "settings.max_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.database.kind == BackendKind::Mysql
            && self.database.mysql.pool.maximum_pool_size == 0
        {
            return Err(Error::Config(
                "database.mysql.pool.maximum_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: TesseraConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera configuration

[database]
# Backend: "sqlite" (embedded, default) or "mysql"
type = "sqlite"

[database.sqlite]
# Database file, relative to the data directory
filename = "playerdata.db"

[database.mysql]
host = "localhost"
port = 3306
database = "playerinformation"
username = "root"
password = ""

[database.mysql.pool]
maximum_pool_size = 10
minimum_idle = 2
connection_timeout_ms = 30000
idle_timeout_ms = 600000
max_lifetime_ms = 1800000

[settings]
# Log every repository call at debug level
debug = false
# Worker threads serving the *_async operations
worker_threads = 4
# Tasks allowed to queue before submissions are rejected
max_queue_depth = 4096
# Budget for timed reads before falling back to the default value
read_timeout_ms = 1000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{} ({})", msg, path.display())),
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_matches_default_struct() {
        let parsed = TesseraConfig::from_toml(TesseraConfig::default_toml()).unwrap();
        assert_eq!(parsed, TesseraConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = TesseraConfig::from_toml("").unwrap();
        assert_eq!(config.database.kind, BackendKind::Sqlite);
        assert_eq!(config.settings.read_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn parse_mysql_with_partial_pool() {
        let config = TesseraConfig::from_toml(
            r#"
[database]
type = "mysql"

[database.mysql]
host = "db.internal"

[database.mysql.pool]
maximum_pool_size = 20
"#,
        )
        .unwrap();
        assert_eq!(config.database.kind, BackendKind::Mysql);
        assert_eq!(config.database.mysql.host, "db.internal");
        assert_eq!(config.database.mysql.port, 3306);
        assert_eq!(config.database.mysql.pool.maximum_pool_size, 20);
        assert_eq!(config.database.mysql.pool.minimum_idle, 2);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = TesseraConfig::from_toml("[database]\ntype = \"postgres\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = TesseraConfig::from_toml("[settings]\nworker_threads = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        TesseraConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(TesseraConfig::from_file(&path).unwrap(), TesseraConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[settings]\ndebug = true\n").unwrap();
        TesseraConfig::write_default_if_missing(&path).unwrap();
        assert!(TesseraConfig::from_file(&path).unwrap().settings.debug);
    }

    #[test]
    fn write_to_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = TesseraConfig::default();
        config.settings.worker_threads = 8;
        config.database.sqlite.filename = "other.db".to_string();
        config.write_to_file(&path).unwrap();
        assert_eq!(TesseraConfig::from_file(&path).unwrap(), config);
    }
}
