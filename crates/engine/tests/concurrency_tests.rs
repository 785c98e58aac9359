//! Multi-threaded cache tests
//!
//! Validates per-identity serialization: concurrent first loads share one
//! backend round trip, and writers on one identity never lose updates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tessera_core::{AttributeDefinition, BackendError, EntityAttributeRecord, IdentityId};
use tessera_engine::schema::default_toml;
use tessera_engine::{DefinitionRegistry, Repository};
use tessera_storage::{BackendKind, BackendStats, SqliteBackend, StorageBackend};

/// SQLite backend that counts loads and makes each one slow
struct CountingBackend {
    inner: SqliteBackend,
    loads: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: SqliteBackend::in_memory(),
            loads: AtomicUsize::new(0),
        }
    }
}

impl StorageBackend for CountingBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }
    fn initialize(&self) -> Result<(), BackendError> {
        self.inner.initialize()
    }
    fn shutdown(&self) -> Result<(), BackendError> {
        self.inner.shutdown()
    }
    fn migrate(&self, definitions: &[Arc<AttributeDefinition>]) -> Result<usize, BackendError> {
        self.inner.migrate(definitions)
    }
    fn load(&self, id: IdentityId) -> Result<Option<EntityAttributeRecord>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        self.inner.load(id)
    }
    fn load_all(&self) -> Result<Vec<EntityAttributeRecord>, BackendError> {
        self.inner.load_all()
    }
    fn save(&self, record: &EntityAttributeRecord) -> Result<(), BackendError> {
        self.inner.save(record)
    }
    fn save_batch(&self, records: &[EntityAttributeRecord]) -> Result<(), BackendError> {
        self.inner.save_batch(records)
    }
    fn delete(&self, id: IdentityId) -> Result<bool, BackendError> {
        self.inner.delete(id)
    }
    fn set_attribute(
        &self,
        id: IdentityId,
        display_name: &str,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        self.inner.set_attribute(id, display_name, name, value)
    }
    fn get_attribute(&self, id: IdentityId, name: &str) -> Result<Option<String>, BackendError> {
        self.inner.get_attribute(id, name)
    }
    fn remove_attribute(&self, id: IdentityId, name: &str) -> Result<(), BackendError> {
        self.inner.remove_attribute(id, name)
    }
    fn exists(&self, id: IdentityId) -> Result<bool, BackendError> {
        self.inner.exists(id)
    }
    fn count(&self) -> Result<u64, BackendError> {
        self.inner.count()
    }
    fn all_identities(&self) -> Result<Vec<IdentityId>, BackendError> {
        self.inner.all_identities()
    }
    fn update_display_name(&self, id: IdentityId, display_name: &str) -> Result<(), BackendError> {
        self.inner.update_display_name(id, display_name)
    }
    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
    fn stats(&self) -> Result<BackendStats, BackendError> {
        self.inner.stats()
    }
    fn columns(&self) -> Vec<String> {
        self.inner.columns()
    }
}

fn counting_repo() -> (Arc<Repository>, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::new());
    let registry = Arc::new(DefinitionRegistry::from_toml(default_toml()).unwrap());
    let repo = Repository::new(Arc::clone(&backend) as Arc<dyn StorageBackend>, registry);
    repo.initialize().unwrap();
    (Arc::new(repo), backend)
}

/// Test: concurrent first loads of one identity hit the backend once
#[test]
fn test_concurrent_first_load_single_round_trip() {
    let (repo, backend) = counting_repo();
    let id = IdentityId::new();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                repo.load(id, "Steve").unwrap()
            })
        })
        .collect();

    let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    assert!(records.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(repo.cached_count(), 1);
}

/// Test: distinct identities load independently
#[test]
fn test_distinct_identities_each_load_once() {
    let (repo, backend) = counting_repo();
    let ids: Vec<_> = (0..4).map(|_| IdentityId::new()).collect();
    let barrier = Arc::new(Barrier::new(ids.len() * 2));

    let handles: Vec<_> = ids
        .iter()
        .chain(ids.iter())
        .map(|&id| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                repo.get(id, "p", "coins").unwrap()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), "0");
    }

    assert_eq!(backend.loads.load(Ordering::SeqCst), ids.len());
    assert_eq!(repo.cached_count(), ids.len());
}

/// Test: increments on one identity from many threads are not lost
#[test]
fn test_concurrent_add_int_no_lost_updates() {
    let (repo, _backend) = counting_repo();
    let id = IdentityId::new();
    let threads = 8;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_thread {
                    repo.add_int(id, "Steve", "coins", 1).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let expected = (threads * per_thread).to_string();
    assert_eq!(repo.get(id, "Steve", "coins").unwrap(), expected);
    repo.unload(id).unwrap();
    assert_eq!(repo.get(id, "Steve", "coins").unwrap(), expected);
}

/// Test: unload racing with writers never drops an accepted write
#[test]
fn test_unload_races_with_writers() {
    let (repo, _backend) = counting_repo();
    let id = IdentityId::new();
    let barrier = Arc::new(Barrier::new(2));

    let writer = {
        let repo = Arc::clone(&repo);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..20 {
                repo.add_int(id, "Steve", "coins", 5).unwrap();
            }
        })
    };
    let unloader = {
        let repo = Arc::clone(&repo);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..20 {
                repo.unload(id).unwrap();
            }
        })
    };
    writer.join().unwrap();
    unloader.join().unwrap();

    assert_eq!(repo.get(id, "Steve", "coins").unwrap(), "100");
}
