//! Backend connection settings
//!
//! These structs are embedded in the engine's `tessera.toml` under
//! `[database.sqlite]` and `[database.mysql]`. Every field has a default so
//! partial sections parse.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedded backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file name, relative to the data directory
    #[serde(default = "default_filename")]
    pub filename: String,
}

fn default_filename() -> String {
    "playerdata.db".to_string()
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            filename: default_filename(),
        }
    }
}

/// Networked backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySqlConfig {
    /// Server host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Schema name
    #[serde(default = "default_database")]
    pub database: String,
    /// Login user
    #[serde(default = "default_username")]
    pub username: String,
    /// Login password
    #[serde(default)]
    pub password: String,
    /// Connection pool sizing
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_database() -> String {
    "playerinformation".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: String::new(),
            pool: PoolConfig::default(),
        }
    }
}

/// Connection pool bounds and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on open connections
    #[serde(default = "default_max_pool_size")]
    pub maximum_pool_size: u32,
    /// Connections kept open while idle
    #[serde(default = "default_min_idle")]
    pub minimum_idle: u32,
    /// Wait limit for acquiring a connection, in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Idle connections older than this are closed, in milliseconds
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Connections are recycled after this age, in milliseconds
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    2
}

fn default_connection_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    600_000
}

fn default_max_lifetime_ms() -> u64 {
    1_800_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            maximum_pool_size: default_max_pool_size(),
            minimum_idle: default_min_idle(),
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
        }
    }
}

impl PoolConfig {
    /// Acquire timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Maximum connection age as a Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Minimum idle clamped to the pool size
    pub fn effective_min_idle(&self) -> u32 {
        self.minimum_idle.min(self.maximum_pool_size.max(1))
    }
}
