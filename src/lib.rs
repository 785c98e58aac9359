//! Tessera - per-identity typed attribute store
//!
//! Tessera keeps a set of named, typed attributes for every identity (a
//! player, an account) in a single relational table, with a write-through
//! cache in front of it. Attribute definitions are data: they are loaded from
//! `attributes.toml` and can change at runtime.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{IdentityId, Tessera};
//!
//! let store = Tessera::open("/path/to/data")?;
//! let id = store.resolve("Steve").unwrap_or_else(IdentityId::new);
//!
//! store.add(id, "Steve", "coins", 100);
//! store.promote(id, "Steve", "rank");
//! assert_eq!(store.get(id, "Steve", "coins").as_deref(), Some("100"));
//!
//! store.shutdown()?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: attribute kinds, definitions, records, errors
//! - `tessera-storage`: SQLite and MySQL backends behind `StorageBackend`
//! - `tessera-engine`: definition registry, cache, scheduler, facade
//!
//! Everything a host needs is re-exported here.

pub use tessera_core::{
    column_name, AttributeDefinition, AttributeType, BackendError, ConversionError,
    DefinitionKind, EntityAttributeRecord, Error, IdentityId, Result, SchemaError, SqlClass,
    TypedValue, ValidationError,
};
pub use tessera_engine::{
    BackgroundScheduler, DatabaseConfig, DefinitionRegistry, DefinitionSet, IdentityResolver,
    KnownIdentityResolver, OfflineIdentityResolver, Pending, Repository, SchedulerStats,
    Settings, TaskPriority, Tessera, TesseraConfig, TesseraStats, ATTRIBUTES_FILE_NAME,
    CONFIG_FILE_NAME,
};
pub use tessera_storage::{
    BackendKind, BackendStats, MySqlBackend, MySqlConfig, PoolConfig, PoolStats, SqliteBackend,
    SqliteConfig, StorageBackend,
};
