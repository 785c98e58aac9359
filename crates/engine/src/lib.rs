//! Attribute engine for Tessera
//!
//! This crate ties the lower layers together:
//! - Schema: attribute definitions loaded from `attributes.toml`, published
//!   as immutable snapshots
//! - Repository: per-identity write-through cache over a storage backend
//! - Background: worker pool serving the `*_async` operations
//! - Tessera: the public facade with config loading and lifecycle hooks
//!
//! The engine is the only component that knows about:
//! - Which backend the configuration selects
//! - Cache lifecycle (load, unload, shutdown flush)
//! - Identity resolution

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod config;
pub mod facade;
pub mod identity;
pub mod pending;
pub mod repository;
pub mod schema;

pub use background::{BackgroundScheduler, BackpressureError, SchedulerStats, TaskPriority};
pub use config::{DatabaseConfig, Settings, TesseraConfig, CONFIG_FILE_NAME};
pub use facade::{create_backend, Tessera, TesseraStats};
pub use identity::{IdentityResolver, KnownIdentityResolver, OfflineIdentityResolver};
pub use pending::Pending;
pub use repository::Repository;
pub use schema::{
    parse_definitions, render_definitions, DefinitionRegistry, DefinitionSet,
    ATTRIBUTES_FILE_NAME,
};
