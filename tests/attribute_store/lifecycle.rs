//! Open, unload, shutdown and reopen

use crate::common::*;
use tessera::IdentityId;

#[test]
fn values_survive_reopen() {
    let t = TestStore::new();
    let id = offline("Steve");
    assert!(t.set(id, "Steve", "nickname", "Builder"));
    assert_eq!(t.add(id, "Steve", "coins", 250), Some(250));

    let t = t.reopen();
    assert!(!t.is_loaded(id));
    assert_eq!(t.get(id, "Steve", "nickname").as_deref(), Some("Builder"));
    assert_eq!(t.get_int(id, "Steve", "coins"), Some(250));
}

#[test]
fn unload_persists_and_evicts() {
    let t = TestStore::new();
    let id = IdentityId::new();
    t.load(id, "Alex").unwrap();
    assert!(t.is_loaded(id));
    assert!(!t.repository().backend().exists(id).unwrap());

    t.unload(id).unwrap();
    assert!(!t.is_loaded(id));
    assert!(t.repository().backend().exists(id).unwrap());
    assert!(t.record(id).is_none());
}

#[test]
fn unload_of_unknown_identity_is_a_no_op() {
    let t = TestStore::new();
    t.unload(IdentityId::new()).unwrap();
    assert_eq!(t.stats().unwrap().backend.player_count, 0);
}

#[test]
fn stats_describe_backend_and_cache() {
    let t = TestStore::new();
    for name in ["a", "b", "c"] {
        t.load(offline(name), name).unwrap();
    }
    t.save_all().unwrap();

    let stats = t.stats().unwrap();
    assert_eq!(stats.backend.player_count, 3);
    assert_eq!(stats.backend.column_count, 6);
    assert!(stats.backend.file_size.is_some());
    assert!(stats.backend.pool.is_none());
    assert_eq!(stats.cached_identities, 3);
    assert_eq!(stats.definitions, 6);
    assert_eq!(stats.scheduler.worker_count, 4);
}

#[test]
fn operations_after_shutdown_fail_cleanly() {
    let t = TestStore::new();
    let id = IdentityId::new();
    t.shutdown().unwrap();
    assert!(!t.is_healthy());
    assert!(!t.set(id, "Steve", "coins", "1"));
    assert!(t.try_get(id, "Steve", "coins").is_err());
    assert!(t.record(id).is_none());
}
