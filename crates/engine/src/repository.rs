//! Write-through record cache
//!
//! Each identity owns one slot in a `DashMap`. A slot is a mutex around the
//! cached record; holding it serializes every operation on that identity,
//! including the backend load, while other identities proceed in parallel.
//!
//! Slot lifecycle:
//!
//! ```text
//! Empty --load--> Cached --unload/shutdown--> Evicted (removed from map)
//!   \--load failed--> Evicted
//! ```
//!
//! A caller that finds an `Evicted` slot retries with a fresh one. Backend
//! writes happen before the cached record is touched, so a failed write
//! leaves the cache as it was.
//!
//! Lock order is slot mutex before map shard. Code that walks the map
//! collects the slot handles first and locks them after the walk.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{
    AttributeDefinition, AttributeType, EntityAttributeRecord, Error, IdentityId, Result,
    ValidationError, COLUMN_PREFIX,
};
use tessera_storage::StorageBackend;
use tracing::{debug, error, info, warn};

use crate::schema::{DefinitionRegistry, DefinitionSet};

enum SlotState {
    Empty,
    Cached(EntityAttributeRecord),
    Evicted,
}

struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }
}

/// Per-identity cache in front of a storage backend
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<DefinitionRegistry>,
    slots: DashMap<IdentityId, Arc<Slot>>,
    debug: bool,
}

impl Repository {
    /// Repository over `backend`; call `initialize` before use
    pub fn new(backend: Arc<dyn StorageBackend>, registry: Arc<DefinitionRegistry>) -> Self {
        Self {
            backend,
            registry,
            slots: DashMap::new(),
            debug: false,
        }
    }

    /// Log every call at debug level
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Backend in use
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Definition registry in use
    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize the backend, then migrate it to the current definitions
    ///
    /// # Errors
    ///
    /// Any backend failure; the caller should abort startup.
    pub fn initialize(&self) -> Result<()> {
        self.backend.initialize()?;
        let added = self.migrate_schema()?;
        info!(
            target: "tessera::repo",
            backend = %self.backend.kind(),
            definitions = self.registry.len(),
            columns_added = added,
            "Repository initialized"
        );
        Ok(())
    }

    /// Add backend columns for definitions that lack one
    pub fn migrate_schema(&self) -> Result<usize> {
        let definitions = self.registry.all();
        let added = self.backend.migrate(&definitions)?;
        if added > 0 {
            info!(target: "tessera::repo", added, "Schema migrated");
        }
        Ok(added)
    }

    /// Persist every cached record in one batch, clear the cache, close the backend
    ///
    /// If the batch fails nothing is evicted and the backend stays open.
    pub fn shutdown(&self) -> Result<()> {
        let records = self.cached_records();
        self.backend.save_batch(&records)?;
        let evicted = self.evict_all();
        self.backend.shutdown()?;
        info!(
            target: "tessera::repo",
            saved = records.len(),
            evicted,
            "Repository shut down"
        );
        Ok(())
    }

    /// Persist one identity's record and drop it from the cache
    ///
    /// The record is evicted even if the final save fails; every accepted
    /// mutation was already written through.
    pub fn unload(&self, id: IdentityId) -> Result<()> {
        let Some(slot) = self.slots.get(&id).map(|entry| Arc::clone(entry.value())) else {
            return Ok(());
        };
        let mut state = slot.state.lock();
        let result = match std::mem::replace(&mut *state, SlotState::Evicted) {
            SlotState::Cached(record) => self.backend.save(&record),
            SlotState::Empty | SlotState::Evicted => Ok(()),
        };
        self.slots.remove_if(&id, |_, current| Arc::ptr_eq(current, &slot));
        drop(state);
        if let Err(err) = &result {
            error!(target: "tessera::repo", identity = %id, error = %err, "Save on unload failed");
        } else if self.debug {
            debug!(target: "tessera::repo", identity = %id, "Unloaded");
        }
        result.map_err(Error::from)
    }

    /// Persist every cached record in one batch without evicting
    pub fn save_all_cached(&self) -> Result<usize> {
        let records = self.cached_records();
        self.backend.save_batch(&records)?;
        debug!(target: "tessera::repo", saved = records.len(), "Saved cached records");
        Ok(records.len())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load (or fetch from cache) an identity's record
    pub fn load(&self, id: IdentityId, display_name: &str) -> Result<EntityAttributeRecord> {
        self.with_record(id, display_name, |record| Ok(record.clone()))
    }

    /// Effective value of one attribute: stored, or the definition default
    pub fn get(&self, id: IdentityId, display_name: &str, name: &str) -> Result<String> {
        let definition = self.definition(name)?;
        self.with_record(id, display_name, |record| {
            Ok(record
                .get(definition.name())
                .unwrap_or(definition.default_value())
                .to_string())
        })
    }

    /// Effective value of every defined attribute, in definition order
    pub fn get_all(&self, id: IdentityId, display_name: &str) -> Result<Vec<(String, String)>> {
        let snapshot = self.registry.snapshot();
        self.with_record(id, display_name, |record| {
            Ok(snapshot
                .all()
                .iter()
                .map(|d| {
                    let value = record.get(d.name()).unwrap_or(d.default_value());
                    (d.name().to_string(), value.to_string())
                })
                .collect())
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Validate and store one attribute in canonical form
    ///
    /// The cache holds the same string a reload returns, so `TRUE` is
    /// stored as `true` and `+5` as `5`.
    pub fn set(&self, id: IdentityId, display_name: &str, name: &str, value: &str) -> Result<()> {
        let definition = self.definition(name)?;
        let value = definition.canonicalize(value)?;
        self.with_record(id, display_name, |record| {
            self.write_value(record, &definition, &value)
        })
    }

    /// Add `delta` to an Integer attribute and return the new value
    ///
    /// Non-Integer attributes and overflow fail without changing anything.
    pub fn add_int(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        delta: i64,
    ) -> Result<i64> {
        let definition = self.definition(name)?;
        if definition.attribute_type() != AttributeType::Integer {
            return Err(ValidationError::WrongType {
                name: name.to_string(),
                expected: AttributeType::Integer.to_string(),
                actual: definition.attribute_type().to_string(),
            }
            .into());
        }
        let fallback = definition.default_value().parse::<i64>().unwrap_or(0);
        self.with_record(id, display_name, |record| {
            let current = record.get_int(definition.name(), fallback);
            let updated = current.checked_add(delta).ok_or_else(|| ValidationError::Overflow {
                name: name.to_string(),
            })?;
            self.write_value(record, &definition, &updated.to_string())?;
            Ok(updated)
        })
    }

    /// Store the definition's current default and return it
    pub fn reset(&self, id: IdentityId, display_name: &str, name: &str) -> Result<String> {
        let definition = self.definition(name)?;
        let default = definition.canonicalize(definition.default_value())?;
        self.with_record(id, display_name, |record| {
            self.write_value(record, &definition, &default)?;
            Ok(default.clone())
        })
    }

    /// Clear one attribute so it reads as the definition default again
    pub fn remove(&self, id: IdentityId, display_name: &str, name: &str) -> Result<()> {
        let definition = self.definition(name)?;
        self.with_record(id, display_name, |record| {
            self.backend.remove_attribute(id, definition.name())?;
            record.remove(definition.name());
            Ok(())
        })
    }

    /// Read-modify-write of one attribute under the identity's lock
    ///
    /// `f` receives the definition and the effective current value and
    /// returns the new value, which must validate. Returns the stored value.
    pub fn modify<F>(&self, id: IdentityId, display_name: &str, name: &str, f: F) -> Result<String>
    where
        F: FnOnce(&AttributeDefinition, &str) -> Result<String>,
    {
        let definition = self.definition(name)?;
        self.with_record(id, display_name, |record| {
            let current = record
                .get(definition.name())
                .unwrap_or(definition.default_value())
                .to_string();
            let next = definition.canonicalize(&f(definition.as_ref(), current.as_str())?)?;
            if next != current || !record.has(definition.name()) {
                self.write_value(record, &definition, &next)?;
            }
            Ok(next)
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Whether an identity's record is cached
    pub fn is_loaded(&self, id: IdentityId) -> bool {
        let Some(slot) = self.slots.get(&id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let state = slot.state.lock();
        matches!(*state, SlotState::Cached(_))
    }

    /// Number of cached records
    pub fn cached_count(&self) -> usize {
        self.slot_handles()
            .iter()
            .filter(|(_, slot)| matches!(*slot.state.lock(), SlotState::Cached(_)))
            .count()
    }

    /// Identities with a cached record
    pub fn cached_identities(&self) -> Vec<IdentityId> {
        self.slot_handles()
            .into_iter()
            .filter(|(_, slot)| matches!(*slot.state.lock(), SlotState::Cached(_)))
            .map(|(id, _)| id)
            .collect()
    }

    /// Copy of a cached record; never loads
    pub fn record(&self, id: IdentityId) -> Option<EntityAttributeRecord> {
        let slot = self.slots.get(&id).map(|entry| Arc::clone(entry.value()))?;
        let state = slot.state.lock();
        match &*state {
            SlotState::Cached(record) => Some(record.clone()),
            SlotState::Empty | SlotState::Evicted => None,
        }
    }

    /// Backend columns no current definition maps to
    ///
    /// Columns are never dropped, so a removed definition leaves one behind.
    pub fn stale_columns(&self) -> Vec<String> {
        let snapshot = self.registry.snapshot();
        self.backend
            .columns()
            .into_iter()
            .filter(|column| snapshot.by_column(column).is_none())
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn definition(&self, name: &str) -> Result<Arc<AttributeDefinition>> {
        self.registry.get(name).ok_or_else(|| {
            ValidationError::UnknownAttribute {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Write through to the backend, then update the cached record
    fn write_value(
        &self,
        record: &mut EntityAttributeRecord,
        definition: &AttributeDefinition,
        value: &str,
    ) -> Result<()> {
        self.backend
            .set_attribute(record.id(), record.display_name(), definition.name(), value)?;
        record.set(definition.name(), value);
        if self.debug {
            debug!(
                target: "tessera::repo",
                identity = %record.id(),
                attribute = %definition.name(),
                value = %value,
                "Attribute written"
            );
        }
        Ok(())
    }

    /// Run `f` on the identity's cached record, loading it first if needed
    fn with_record<T>(
        &self,
        id: IdentityId,
        display_name: &str,
        f: impl FnOnce(&mut EntityAttributeRecord) -> Result<T>,
    ) -> Result<T> {
        loop {
            let slot = Arc::clone(
                self.slots
                    .entry(id)
                    .or_insert_with(|| Arc::new(Slot::new()))
                    .value(),
            );
            let mut state = slot.state.lock();
            if matches!(*state, SlotState::Evicted) {
                continue;
            }
            if matches!(*state, SlotState::Empty) {
                match self.fetch(id, display_name) {
                    Ok(record) => *state = SlotState::Cached(record),
                    Err(err) => {
                        *state = SlotState::Evicted;
                        self.slots.remove_if(&id, |_, current| Arc::ptr_eq(current, &slot));
                        warn!(target: "tessera::repo", identity = %id, error = %err, "Load failed");
                        return Err(err);
                    }
                }
            }
            if let SlotState::Cached(record) = &mut *state {
                return f(record);
            }
        }
    }

    /// Backend load with re-keying, or a fresh record of defaults
    fn fetch(&self, id: IdentityId, display_name: &str) -> Result<EntityAttributeRecord> {
        let snapshot = self.registry.snapshot();
        match self.backend.load(id)? {
            Some(stored) => {
                let mut record = rekey(stored, &snapshot);
                if !display_name.is_empty() && record.display_name() != display_name {
                    match self.backend.update_display_name(id, display_name) {
                        Ok(()) => debug!(
                            target: "tessera::repo",
                            identity = %id,
                            from = %record.display_name(),
                            to = %display_name,
                            "Display name changed"
                        ),
                        Err(err) => warn!(
                            target: "tessera::repo",
                            identity = %id,
                            error = %err,
                            "Failed to persist display name change"
                        ),
                    }
                    record.set_display_name(display_name);
                }
                if self.debug {
                    debug!(
                        target: "tessera::repo",
                        identity = %id,
                        values = record.len(),
                        "Loaded"
                    );
                }
                Ok(record)
            }
            None => {
                let defaults: HashMap<String, String> = snapshot
                    .all()
                    .iter()
                    .map(|d| (d.name().to_string(), d.default_value().to_string()))
                    .collect();
                if self.debug {
                    debug!(target: "tessera::repo", identity = %id, "New identity, using defaults");
                }
                Ok(EntityAttributeRecord::with_values(id, display_name, defaults))
            }
        }
    }

    fn slot_handles(&self) -> Vec<(IdentityId, Arc<Slot>)> {
        self.slots
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    fn cached_records(&self) -> Vec<EntityAttributeRecord> {
        self.slot_handles()
            .into_iter()
            .filter_map(|(_, slot)| match &*slot.state.lock() {
                SlotState::Cached(record) => Some(record.clone()),
                SlotState::Empty | SlotState::Evicted => None,
            })
            .collect()
    }

    fn evict_all(&self) -> usize {
        let mut evicted = 0;
        for (id, slot) in self.slot_handles() {
            let mut state = slot.state.lock();
            if matches!(*state, SlotState::Cached(_)) {
                evicted += 1;
            }
            *state = SlotState::Evicted;
            self.slots.remove_if(&id, |_, current| Arc::ptr_eq(current, &slot));
        }
        evicted
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("backend", &self.backend.kind())
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Map backend keys (column suffixes) to definition names
///
/// Values in columns no definition owns are dropped.
fn rekey(stored: EntityAttributeRecord, snapshot: &DefinitionSet) -> EntityAttributeRecord {
    let values = stored
        .values()
        .iter()
        .filter_map(|(suffix, value)| {
            let column = format!("{}{}", COLUMN_PREFIX, suffix);
            snapshot
                .by_column(&column)
                .map(|d| (d.name().to_string(), value.clone()))
        })
        .collect();
    EntityAttributeRecord::with_values(stored.id(), stored.display_name(), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::default_toml;
    use tessera_storage::SqliteBackend;

    fn repo() -> Repository {
        let registry = Arc::new(DefinitionRegistry::from_toml(default_toml()).unwrap());
        let repo = Repository::new(Arc::new(SqliteBackend::in_memory()), registry);
        repo.initialize().unwrap();
        repo
    }

    #[test]
    fn fresh_identity_reads_defaults() {
        let repo = repo();
        let id = IdentityId::new();
        assert_eq!(repo.get(id, "Steve", "coins").unwrap(), "0");
        assert_eq!(repo.get(id, "Steve", "rank").unwrap(), "member");
        assert!(repo.is_loaded(id));
        assert!(!repo.backend().exists(id).unwrap());
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let repo = repo();
        let err = repo.set(IdentityId::new(), "Steve", "ghost", "1").unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn invalid_value_leaves_record_untouched() {
        let repo = repo();
        let id = IdentityId::new();
        repo.set(id, "Steve", "coins", "5").unwrap();
        assert!(repo.set(id, "Steve", "coins", "five").is_err());
        assert_eq!(repo.get(id, "Steve", "coins").unwrap(), "5");
    }

    #[test]
    fn add_int_rejects_non_integer_and_overflow() {
        let repo = repo();
        let id = IdentityId::new();
        let before = repo.load(id, "Steve").unwrap();
        assert!(matches!(
            repo.add_int(id, "Steve", "rank", 1),
            Err(Error::Validation(ValidationError::WrongType { .. }))
        ));
        assert_eq!(repo.record(id).unwrap(), before);

        repo.set(id, "Steve", "coins", &i64::MAX.to_string()).unwrap();
        assert!(matches!(
            repo.add_int(id, "Steve", "coins", 1),
            Err(Error::Validation(ValidationError::Overflow { .. }))
        ));
        assert_eq!(repo.get(id, "Steve", "coins").unwrap(), i64::MAX.to_string());
    }

    #[test]
    fn remove_falls_back_to_default() {
        let repo = repo();
        let id = IdentityId::new();
        repo.set(id, "Steve", "nickname", "Stevie").unwrap();
        repo.remove(id, "Steve", "nickname").unwrap();
        assert_eq!(repo.get(id, "Steve", "nickname").unwrap(), "");
        assert!(!repo.record(id).unwrap().has("nickname"));
        assert_eq!(repo.backend().get_attribute(id, "nickname").unwrap(), None);
    }

    #[test]
    fn unload_then_reload_reads_backend() {
        let repo = repo();
        let id = IdentityId::new();
        repo.set(id, "Steve", "nickname", "Stevie").unwrap();
        repo.unload(id).unwrap();
        assert!(!repo.is_loaded(id));
        assert_eq!(repo.cached_count(), 0);
        assert_eq!(repo.get(id, "Steve", "nickname").unwrap(), "Stevie");
    }

    #[test]
    fn rename_on_load_is_persisted() {
        let repo = repo();
        let id = IdentityId::new();
        repo.set(id, "Old", "coins", "1").unwrap();
        repo.unload(id).unwrap();
        let record = repo.load(id, "New").unwrap();
        assert_eq!(record.display_name(), "New");
        assert_eq!(
            repo.backend().load(id).unwrap().unwrap().display_name(),
            "New"
        );
    }

    #[test]
    fn modify_validates_result() {
        let repo = repo();
        let id = IdentityId::new();
        let next = repo
            .modify(id, "Steve", "rank", |d, cur| Ok(d.next_value(cur)))
            .unwrap();
        assert_eq!(next, "vip");
        assert!(repo
            .modify(id, "Steve", "rank", |_, _| Ok("owner".to_string()))
            .is_err());
        assert_eq!(repo.get(id, "Steve", "rank").unwrap(), "vip");
    }

    #[test]
    fn stale_columns_after_definition_removed() {
        let repo = repo();
        assert!(repo.stale_columns().is_empty());
        repo.registry().remove("nickname");
        assert_eq!(repo.stale_columns(), vec!["info_nickname"]);
    }

    #[test]
    fn shutdown_persists_and_clears() {
        let repo = repo();
        let a = IdentityId::new();
        let b = IdentityId::new();
        repo.load(a, "A").unwrap();
        repo.load(b, "B").unwrap();
        assert_eq!(repo.cached_count(), 2);
        assert_eq!(repo.save_all_cached().unwrap(), 2);
        assert_eq!(repo.backend().count().unwrap(), 2);
        repo.shutdown().unwrap();
        assert_eq!(repo.cached_count(), 0);
        assert!(!repo.backend().is_healthy());
    }
}
