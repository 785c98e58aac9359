//! Tessera: the public entry point
//!
//! Wraps a [`Repository`], the definition registry and a background
//! scheduler. Every operation comes in three shapes:
//!
//! - plain (`set`, `get`, ...): blocking; failures are logged and reported
//!   as `false` / `None`
//! - `try_*`: blocking; failures are returned as typed errors
//! - `*_async`: queued on the scheduler, returning a [`Pending`]
//!
//! Lifecycle and schema changes always return `Result`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tessera_core::{
    AttributeDefinition, AttributeType, EntityAttributeRecord, Error, IdentityId, Result,
    SchemaError, TypedValue, ValidationError,
};
use tessera_storage::{
    BackendKind, BackendStats, MySqlBackend, SqliteBackend, StorageBackend,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::background::{BackgroundScheduler, SchedulerStats, TaskPriority};
use crate::config::{TesseraConfig, CONFIG_FILE_NAME};
use crate::identity::{IdentityResolver, OfflineIdentityResolver};
use crate::pending::Pending;
use crate::repository::Repository;
use crate::schema::{self, DefinitionRegistry, ATTRIBUTES_FILE_NAME};

/// Snapshot of engine health counters
#[derive(Debug, Clone)]
pub struct TesseraStats {
    /// Backend row/column counts and size or pool metrics
    pub backend: BackendStats,
    /// Identities with a cached record
    pub cached_identities: usize,
    /// Loaded attribute definitions
    pub definitions: usize,
    /// Background worker counters
    pub scheduler: SchedulerStats,
}

impl fmt::Display for TesseraStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}; {} cached, {} definitions; {}",
            self.backend, self.cached_identities, self.definitions, self.scheduler
        )
    }
}

/// Per-identity typed attribute store
pub struct Tessera {
    config: TesseraConfig,
    repository: Arc<Repository>,
    scheduler: BackgroundScheduler,
    resolver: Arc<dyn IdentityResolver>,
    attributes_path: Option<PathBuf>,
}

impl Tessera {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Open the store rooted at `data_dir` and initialize it
    ///
    /// Writes default `tessera.toml` and `attributes.toml` files when they
    /// are missing, then builds the configured backend, creates the table
    /// and migrates it to the loaded definitions.
    ///
    /// # Errors
    ///
    /// Unreadable or invalid configuration, or any backend failure during
    /// initialization.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        TesseraConfig::write_default_if_missing(&config_path)?;
        let config = TesseraConfig::from_file(&config_path)?;

        Self::open_with_config(data_dir, config)
    }

    /// Open the store with an explicit configuration and initialize it
    ///
    /// The configuration is not written back to `tessera.toml`.
    pub fn open_with_config<P: AsRef<Path>>(data_dir: P, config: TesseraConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        config.validate()?;
        std::fs::create_dir_all(data_dir)?;

        let attributes_path = data_dir.join(ATTRIBUTES_FILE_NAME);
        schema::write_default_if_missing(&attributes_path)?;
        let registry = Arc::new(DefinitionRegistry::new());
        registry.load_file(&attributes_path)?;

        let backend = create_backend(&config, data_dir)?;
        let mut tessera = Self::with_backend(backend, registry, config)?;
        tessera.attributes_path = Some(attributes_path);
        tessera.initialize()?;

        info!(
            target: "tessera::engine",
            path = %data_dir.display(),
            backend = %tessera.config.database.kind,
            "Tessera opened"
        );
        Ok(tessera)
    }

    /// Assemble a store over an existing backend and registry
    ///
    /// Nothing is read from or written to disk and `initialize` is not
    /// called. Schema changes made through this instance are not persisted.
    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<DefinitionRegistry>,
        config: TesseraConfig,
    ) -> Result<Self> {
        config.validate()?;
        let repository = Repository::new(backend, registry).with_debug(config.settings.debug);
        let scheduler = BackgroundScheduler::new(
            config.settings.worker_threads,
            config.settings.max_queue_depth,
        )?;
        Ok(Self {
            config,
            repository: Arc::new(repository),
            scheduler,
            resolver: Arc::new(OfflineIdentityResolver),
            attributes_path: None,
        })
    }

    /// Initialized store over in-memory SQLite with definitions from `attributes_toml`
    pub fn ephemeral(attributes_toml: &str) -> Result<Self> {
        let registry = Arc::new(DefinitionRegistry::from_toml(attributes_toml)?);
        let tessera = Self::with_backend(
            Arc::new(SqliteBackend::in_memory()),
            registry,
            TesseraConfig::default(),
        )?;
        tessera.initialize()?;
        Ok(tessera)
    }

    /// Replace the identity resolver (offline ids by default)
    pub fn with_resolver(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    /// Underlying repository
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize the backend and migrate it to the current definitions
    pub fn initialize(&self) -> Result<()> {
        self.repository.initialize()
    }

    /// Re-read `attributes.toml` and migrate the backend
    ///
    /// Readers see either the old or the new definition set, never a mix.
    /// Returns the entries that were skipped. Without a backing file this
    /// only re-runs the migration.
    pub fn reload_schema(&self) -> Result<Vec<SchemaError>> {
        let skipped = match &self.attributes_path {
            Some(path) => self.repository.registry().load_file(path)?,
            None => Vec::new(),
        };
        self.repository.migrate_schema()?;
        Ok(skipped)
    }

    /// Finish queued work, persist every cached record and close the backend
    pub fn shutdown(&self) -> Result<()> {
        self.scheduler.drain();
        let result = self.repository.shutdown();
        self.scheduler.shutdown();
        match &result {
            Ok(()) => info!(target: "tessera::engine", "Tessera shut down"),
            Err(err) => warn!(target: "tessera::engine", error = %err, "Shutdown failed"),
        }
        result
    }

    /// Persist and evict one identity, e.g. when its session ends
    pub fn unload(&self, id: IdentityId) -> Result<()> {
        self.repository.unload(id)
    }

    /// `unload` on a worker thread
    pub fn unload_async(&self, id: IdentityId) -> Pending<Result<()>> {
        let repository = Arc::clone(&self.repository);
        self.scheduler
            .spawn(TaskPriority::Write, move || repository.unload(id))
    }

    /// Persist every cached record without evicting
    pub fn save_all(&self) -> Result<usize> {
        self.repository.save_all_cached()
    }

    /// `save_all` as background maintenance
    pub fn save_all_async(&self) -> Pending<Result<usize>> {
        let repository = Arc::clone(&self.repository);
        self.scheduler
            .spawn(TaskPriority::Maintenance, move || repository.save_all_cached())
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Identity for a display name, via the configured resolver
    pub fn resolve(&self, display_name: &str) -> Option<IdentityId> {
        self.resolver.resolve(display_name)
    }

    // ========================================================================
    // Raw values
    // ========================================================================

    /// Effective value, or None if the attribute is unknown or the load failed
    pub fn get(&self, id: IdentityId, display_name: &str, name: &str) -> Option<String> {
        self.quietly("get", name, self.try_get(id, display_name, name))
    }

    /// Effective value: stored, or the definition default
    pub fn try_get(&self, id: IdentityId, display_name: &str, name: &str) -> Result<String> {
        self.repository.get(id, display_name, name)
    }

    /// `try_get` on a worker thread
    pub fn get_async(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
    ) -> Pending<Result<String>> {
        let repository = Arc::clone(&self.repository);
        let (display_name, name) = (display_name.to_string(), name.to_string());
        self.scheduler.spawn(TaskPriority::Read, move || {
            repository.get(id, &display_name, &name)
        })
    }

    /// Value within `timeout`, else the definition default
    ///
    /// The read keeps running after a timeout and still populates the cache.
    /// None only for an unknown attribute.
    pub fn get_or_default_within(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        timeout: Duration,
    ) -> Option<String> {
        let default = self.repository.registry().default_value(name)?;
        match self.get_async(id, display_name, name).wait_timeout(timeout) {
            Some(Ok(value)) => Some(value),
            Some(Err(err)) => {
                warn!(
                    target: "tessera::engine",
                    identity = %id,
                    attribute = %name,
                    error = %err,
                    "Timed read failed, using default"
                );
                Some(default)
            }
            None => {
                debug!(
                    target: "tessera::engine",
                    identity = %id,
                    attribute = %name,
                    "Timed read elapsed, using default"
                );
                Some(default)
            }
        }
    }

    /// `get_or_default_within` using `settings.read_timeout_ms`
    pub fn get_or_default(&self, id: IdentityId, display_name: &str, name: &str) -> Option<String> {
        self.get_or_default_within(id, display_name, name, self.config.settings.read_timeout())
    }

    /// Validate and store a value; false if rejected or not persisted
    pub fn set(&self, id: IdentityId, display_name: &str, name: &str, value: &str) -> bool {
        self.quietly("set", name, self.try_set(id, display_name, name, value))
            .is_some()
    }

    /// Validate and store a value
    pub fn try_set(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        self.repository.set(id, display_name, name, value)
    }

    /// `try_set` on a worker thread
    pub fn set_async(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Pending<Result<()>> {
        let repository = Arc::clone(&self.repository);
        let (display_name, name, value) =
            (display_name.to_string(), name.to_string(), value.to_string());
        self.scheduler.spawn(TaskPriority::Write, move || {
            repository.set(id, &display_name, &name, &value)
        })
    }

    /// Add to an Integer attribute; returns the new value
    pub fn add(&self, id: IdentityId, display_name: &str, name: &str, delta: i64) -> Option<i64> {
        self.quietly("add", name, self.try_add(id, display_name, name, delta))
    }

    /// Subtract from an Integer attribute; returns the new value
    pub fn subtract(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        amount: i64,
    ) -> Option<i64> {
        let delta = amount.checked_neg()?;
        self.add(id, display_name, name, delta)
    }

    /// Add to an Integer attribute
    pub fn try_add(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        delta: i64,
    ) -> Result<i64> {
        self.repository.add_int(id, display_name, name, delta)
    }

    /// `try_add` on a worker thread
    pub fn add_async(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        delta: i64,
    ) -> Pending<Result<i64>> {
        let repository = Arc::clone(&self.repository);
        let (display_name, name) = (display_name.to_string(), name.to_string());
        self.scheduler.spawn(TaskPriority::Write, move || {
            repository.add_int(id, &display_name, &name, delta)
        })
    }

    /// Store the definition default; false if not persisted
    pub fn reset(&self, id: IdentityId, display_name: &str, name: &str) -> bool {
        self.quietly("reset", name, self.try_reset(id, display_name, name))
            .is_some()
    }

    /// Store the definition default and return it
    pub fn try_reset(&self, id: IdentityId, display_name: &str, name: &str) -> Result<String> {
        self.repository.reset(id, display_name, name)
    }

    /// Clear a stored value so the default applies
    pub fn remove(&self, id: IdentityId, display_name: &str, name: &str) -> bool {
        self.quietly("remove", name, self.try_remove(id, display_name, name))
            .is_some()
    }

    /// Clear a stored value so the default applies
    pub fn try_remove(&self, id: IdentityId, display_name: &str, name: &str) -> Result<()> {
        self.repository.remove(id, display_name, name)
    }

    // ========================================================================
    // Typed values
    // ========================================================================

    /// Effective value converted to its typed form
    pub fn try_get_typed(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
    ) -> Result<TypedValue> {
        let definition = self.require(name)?;
        let raw = self.repository.get(id, display_name, name)?;
        Ok(definition.convert(&raw)?)
    }

    /// Integer attribute value
    pub fn get_int(&self, id: IdentityId, display_name: &str, name: &str) -> Option<i64> {
        match self.quietly("get_int", name, self.try_get_typed(id, display_name, name))? {
            TypedValue::Integer(value) => Some(value),
            _ => None,
        }
    }

    /// Store an Integer attribute
    pub fn set_int(&self, id: IdentityId, display_name: &str, name: &str, value: i64) -> bool {
        self.set_typed("set_int", id, display_name, name, AttributeType::Integer, value.to_string())
    }

    /// Permission attribute value
    pub fn get_bool(&self, id: IdentityId, display_name: &str, name: &str) -> Option<bool> {
        match self.quietly("get_bool", name, self.try_get_typed(id, display_name, name))? {
            TypedValue::Permission(value) => Some(value),
            _ => None,
        }
    }

    /// Store a Permission attribute
    pub fn set_bool(&self, id: IdentityId, display_name: &str, name: &str, value: bool) -> bool {
        self.set_typed(
            "set_bool",
            id,
            display_name,
            name,
            AttributeType::Permission,
            value.to_string(),
        )
    }

    /// Identifier attribute value
    pub fn get_uuid(&self, id: IdentityId, display_name: &str, name: &str) -> Option<Uuid> {
        match self.quietly("get_uuid", name, self.try_get_typed(id, display_name, name))? {
            TypedValue::Identifier(value) => Some(value),
            _ => None,
        }
    }

    /// Store an Identifier attribute; None clears it back to the default
    pub fn set_uuid(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: Option<Uuid>,
    ) -> bool {
        match value {
            Some(uuid) => self.set_typed(
                "set_uuid",
                id,
                display_name,
                name,
                AttributeType::Identifier,
                uuid.hyphenated().to_string(),
            ),
            None => self.remove(id, display_name, name),
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Step a Ladder or Enum attribute up one value, clamped at the top
    pub fn promote(&self, id: IdentityId, display_name: &str, name: &str) -> Option<String> {
        self.quietly("promote", name, self.try_promote(id, display_name, name))
    }

    /// Step a Ladder or Enum attribute up one value
    pub fn try_promote(&self, id: IdentityId, display_name: &str, name: &str) -> Result<String> {
        self.require_type(name, &[AttributeType::Ladder, AttributeType::Enum])?;
        self.repository
            .modify(id, display_name, name, |d, current| Ok(d.next_value(current)))
    }

    /// Step a Ladder or Enum attribute down one value, clamped at the bottom
    pub fn demote(&self, id: IdentityId, display_name: &str, name: &str) -> Option<String> {
        self.quietly("demote", name, self.try_demote(id, display_name, name))
    }

    /// Step a Ladder or Enum attribute down one value
    pub fn try_demote(&self, id: IdentityId, display_name: &str, name: &str) -> Result<String> {
        self.require_type(name, &[AttributeType::Ladder, AttributeType::Enum])?;
        self.repository
            .modify(id, display_name, name, |d, current| Ok(d.previous_value(current)))
    }

    /// Flip one selection of a MultiEnum attribute; returns the stored value
    pub fn toggle(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Option<String> {
        self.quietly("toggle", name, self.try_toggle(id, display_name, name, value))
    }

    /// Flip one selection of a MultiEnum attribute
    pub fn try_toggle(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Result<String> {
        let definition = self.require_type(name, &[AttributeType::MultiEnum])?;
        if !definition.values().iter().any(|v| v == value) {
            return Err(ValidationError::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
            }
            .into());
        }
        self.repository
            .modify(id, display_name, name, |d, current| Ok(d.toggle(current, value)))
    }

    /// Whether `value` is selected in a MultiEnum attribute
    pub fn is_selected(&self, id: IdentityId, display_name: &str, name: &str, value: &str) -> bool {
        let Some(definition) = self.definition(name) else {
            return false;
        };
        if definition.attribute_type() != AttributeType::MultiEnum {
            return false;
        }
        self.get(id, display_name, name)
            .is_some_and(|current| definition.is_selected(&current, value))
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Every definition with its effective value; empty if the load failed
    pub fn get_all(&self, id: IdentityId, display_name: &str) -> Vec<(String, String)> {
        self.quietly("get_all", "*", self.try_get_all(id, display_name))
            .unwrap_or_default()
    }

    /// Every definition with its effective value, in definition order
    pub fn try_get_all(&self, id: IdentityId, display_name: &str) -> Result<Vec<(String, String)>> {
        self.repository.get_all(id, display_name)
    }

    /// `try_get_all` on a worker thread
    pub fn get_all_async(
        &self,
        id: IdentityId,
        display_name: &str,
    ) -> Pending<Result<Vec<(String, String)>>> {
        let repository = Arc::clone(&self.repository);
        let display_name = display_name.to_string();
        self.scheduler.spawn(TaskPriority::Read, move || {
            repository.get_all(id, &display_name)
        })
    }

    /// Load an identity into the cache and return a copy of its record
    pub fn load(&self, id: IdentityId, display_name: &str) -> Result<EntityAttributeRecord> {
        self.repository.load(id, display_name)
    }

    /// `load` on a worker thread, e.g. to warm the cache at login
    pub fn load_async(
        &self,
        id: IdentityId,
        display_name: &str,
    ) -> Pending<Result<EntityAttributeRecord>> {
        let repository = Arc::clone(&self.repository);
        let display_name = display_name.to_string();
        self.scheduler.spawn(TaskPriority::Read, move || {
            repository.load(id, &display_name)
        })
    }

    /// Copy of a cached record; never loads
    pub fn record(&self, id: IdentityId) -> Option<EntityAttributeRecord> {
        self.repository.record(id)
    }

    /// Whether an identity is cached
    pub fn is_loaded(&self, id: IdentityId) -> bool {
        self.repository.is_loaded(id)
    }

    /// Identities currently cached
    pub fn cached_identities(&self) -> Vec<IdentityId> {
        self.repository.cached_identities()
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Every definition, in load order
    pub fn definitions(&self) -> Vec<Arc<AttributeDefinition>> {
        self.repository.registry().all()
    }

    /// Definition by name
    pub fn definition(&self, name: &str) -> Option<Arc<AttributeDefinition>> {
        self.repository.registry().get(name)
    }

    /// Definition names, in load order
    pub fn names(&self) -> Vec<String> {
        self.repository.registry().names()
    }

    /// Definitions of one kind
    pub fn by_type(&self, ty: AttributeType) -> Vec<Arc<AttributeDefinition>> {
        self.repository.registry().by_type(ty)
    }

    /// Kind of a definition
    pub fn type_of(&self, name: &str) -> Option<AttributeType> {
        self.repository.registry().type_of(name)
    }

    /// Default value of a definition
    pub fn default_value(&self, name: &str) -> Option<String> {
        self.repository.registry().default_value(name)
    }

    /// Whether `raw` is acceptable for the named definition
    pub fn is_valid_value(&self, name: &str, raw: &str) -> bool {
        self.repository.registry().is_valid_value(name, raw)
    }

    /// Add or replace a definition, migrate the backend, persist the file
    pub fn add_definition(
        &self,
        definition: AttributeDefinition,
    ) -> Result<Arc<AttributeDefinition>> {
        let added = self.repository.registry().insert(definition)?;
        self.repository.migrate_schema()?;
        self.persist_definitions()?;
        Ok(added)
    }

    /// Remove a definition and persist the file
    ///
    /// The backend column and any values in it stay.
    pub fn remove_definition(&self, name: &str) -> Result<Option<Arc<AttributeDefinition>>> {
        let removed = self.repository.registry().remove(name);
        if removed.is_some() {
            self.persist_definitions()?;
        }
        Ok(removed)
    }

    /// Backend columns no definition maps to
    pub fn stale_columns(&self) -> Vec<String> {
        self.repository.stale_columns()
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Whether the backend answers
    pub fn is_healthy(&self) -> bool {
        self.repository.backend().is_healthy()
    }

    /// Backend, cache and scheduler counters
    pub fn stats(&self) -> Result<TesseraStats> {
        Ok(TesseraStats {
            backend: self.repository.backend().stats()?,
            cached_identities: self.repository.cached_count(),
            definitions: self.repository.registry().len(),
            scheduler: self.scheduler.stats(),
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn quietly<T>(&self, op: &'static str, name: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(Error::Validation(err)) => {
                debug!(target: "tessera::engine", op, attribute = %name, error = %err, "Rejected");
                None
            }
            Err(err) => {
                warn!(
                    target: "tessera::engine",
                    op,
                    attribute = %name,
                    error = %err,
                    "Operation failed"
                );
                None
            }
        }
    }

    fn set_typed(
        &self,
        op: &'static str,
        id: IdentityId,
        display_name: &str,
        name: &str,
        expected: AttributeType,
        raw: String,
    ) -> bool {
        let result = self
            .require_type(name, &[expected])
            .and_then(|_| self.repository.set(id, display_name, name, &raw));
        self.quietly(op, name, result).is_some()
    }

    fn require(&self, name: &str) -> Result<Arc<AttributeDefinition>> {
        self.definition(name).ok_or_else(|| {
            ValidationError::UnknownAttribute {
                name: name.to_string(),
            }
            .into()
        })
    }

    fn require_type(
        &self,
        name: &str,
        allowed: &[AttributeType],
    ) -> Result<Arc<AttributeDefinition>> {
        let definition = self.require(name)?;
        let actual = definition.attribute_type();
        if allowed.contains(&actual) {
            return Ok(definition);
        }
        let expected = allowed
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        Err(ValidationError::WrongType {
            name: name.to_string(),
            expected,
            actual: actual.to_string(),
        }
        .into())
    }

    fn persist_definitions(&self) -> Result<()> {
        let Some(path) = &self.attributes_path else {
            return Ok(());
        };
        let rendered = schema::render_definitions(&self.repository.registry().all());
        std::fs::write(path, rendered).map_err(|e| {
            Error::Config(format!(
                "Failed to write attributes file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

impl fmt::Debug for Tessera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tessera")
            .field("backend", &self.config.database.kind)
            .field("repository", &self.repository)
            .field("attributes_path", &self.attributes_path)
            .finish()
    }
}

/// Build the backend named by `config`; SQLite paths resolve against `data_dir`
pub fn create_backend(config: &TesseraConfig, data_dir: &Path) -> Result<Arc<dyn StorageBackend>> {
    match config.database.kind {
        BackendKind::Sqlite => {
            let path = data_dir.join(&config.database.sqlite.filename);
            Ok(Arc::new(SqliteBackend::new(path)))
        }
        BackendKind::Mysql => Ok(Arc::new(MySqlBackend::new(config.database.mysql.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Tessera {
        Tessera::ephemeral(schema::default_toml()).unwrap()
    }

    #[test]
    fn boolean_api_reports_rejections() {
        let t = store();
        let id = IdentityId::new();
        assert!(!t.set(id, "Steve", "ghost", "1"));
        assert!(!t.set(id, "Steve", "coins", "lots"));
        assert!(t.set(id, "Steve", "coins", "12"));
        assert_eq!(t.get(id, "Steve", "coins").as_deref(), Some("12"));
        assert_eq!(t.get(id, "Steve", "ghost"), None);
    }

    #[test]
    fn typed_accessors_check_kind() {
        let t = store();
        let id = IdentityId::new();
        assert!(t.set_int(id, "Steve", "coins", 7));
        assert_eq!(t.get_int(id, "Steve", "coins"), Some(7));
        assert!(!t.set_int(id, "Steve", "nickname", 7));
        assert!(t.set_bool(id, "Steve", "fly", true));
        assert_eq!(t.get_bool(id, "Steve", "fly"), Some(true));
        assert_eq!(t.get_bool(id, "Steve", "coins"), None);
    }

    #[test]
    fn subtract_is_negative_add() {
        let t = store();
        let id = IdentityId::new();
        assert_eq!(t.add(id, "Steve", "coins", 10), Some(10));
        assert_eq!(t.subtract(id, "Steve", "coins", 4), Some(6));
        assert_eq!(t.subtract(id, "Steve", "coins", i64::MIN), None);
    }

    #[test]
    fn navigation_requires_matching_kind() {
        let t = store();
        let id = IdentityId::new();
        assert!(matches!(
            t.try_promote(id, "Steve", "coins"),
            Err(Error::Validation(ValidationError::WrongType { .. }))
        ));
        assert!(t.try_toggle(id, "Steve", "colors", "purple").is_err());
        assert_eq!(t.demote(id, "Steve", "rank").as_deref(), Some("member"));
    }

    #[test]
    fn timed_read_falls_back_only_for_known_names() {
        let t = store();
        let id = IdentityId::new();
        assert_eq!(
            t.get_or_default_within(id, "Steve", "rank", Duration::from_secs(5))
                .as_deref(),
            Some("member")
        );
        assert_eq!(t.get_or_default(id, "Steve", "ghost"), None);
    }

    #[test]
    fn stats_count_cache_and_definitions() {
        let t = store();
        t.load(IdentityId::new(), "A").unwrap();
        let stats = t.stats().unwrap();
        assert_eq!(stats.cached_identities, 1);
        assert_eq!(stats.definitions, t.names().len());
        assert_eq!(stats.backend.kind, BackendKind::Sqlite);
        assert!(stats.to_string().starts_with("sqlite:"));
    }
}
