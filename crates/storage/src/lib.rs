//! Storage layer for Tessera
//!
//! This crate implements the relational persistence of attribute records:
//! - StorageBackend: Uniform contract (bootstrap, additive migration, CRUD, batch, health)
//! - SqliteBackend: Embedded single-file store over one serialized connection
//! - MySqlBackend: Networked store over a bounded connection pool
//! - ColumnSet: In-memory view of the attribute columns present in the table
//!
//! # Layout
//!
//! One table, one row per identity:
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `uuid` | Primary key, hyphenated identity |
//! | `player_name` | Last-seen display name |
//! | `last_updated` | Touched on every upsert |
//! | `info_*` | One column per attribute definition |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod mysql;
pub mod sqlite;

pub use backend::{BackendKind, BackendStats, ColumnSet, PoolStats, StorageBackend, TABLE_NAME};
pub use config::{MySqlConfig, PoolConfig, SqliteConfig};
pub use mysql::MySqlBackend;
pub use sqlite::SqliteBackend;
