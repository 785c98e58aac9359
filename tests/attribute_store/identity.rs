//! Identity resolution wired through the facade

use crate::common::*;
use tessera::{IdentityId, KnownIdentityResolver, OfflineIdentityResolver, Tessera};

#[test]
fn default_resolver_is_offline() {
    let t = TestStore::new();
    assert_eq!(t.resolve("Steve"), Some(offline("Steve")));
    assert_eq!(t.resolve(""), None);
}

#[test]
fn custom_resolver_replaces_default() {
    let known = KnownIdentityResolver::with_fallback(OfflineIdentityResolver);
    let id = IdentityId::new();
    known.remember("Steve", id);

    let t = Tessera::ephemeral(ATTRIBUTES).unwrap().with_resolver(known);
    assert_eq!(t.resolve("STEVE"), Some(id));
    assert_eq!(t.resolve("Alex"), Some(offline("Alex")));
}

#[test]
fn resolved_ids_key_the_same_record() {
    let t = TestStore::new();
    let first = t.resolve("Steve").unwrap();
    t.add(first, "Steve", "coins", 5);
    let again = t.resolve("Steve").unwrap();
    assert_eq!(t.get_int(again, "Steve", "coins"), Some(5));
}
