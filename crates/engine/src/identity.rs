//! Display name to identity resolution
//!
//! Online hosts look identities up in their authentication service and plug
//! in their own resolver. Offline hosts derive a stable id from the name.

use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_core::IdentityId;
use uuid::Builder;

/// Maps a display name to a stable identity
pub trait IdentityResolver: Send + Sync {
    /// Identity for `display_name`, if one can be determined
    fn resolve(&self, display_name: &str) -> Option<IdentityId>;
}

/// Name-based version 3 ids over `"OfflinePlayer:" + name`
///
/// Matches the ids offline-mode game servers assign, so records written by
/// either side line up. Names are case-sensitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineIdentityResolver;

impl OfflineIdentityResolver {
    /// Derive the offline identity of `display_name`
    pub fn identity_of(display_name: &str) -> IdentityId {
        let mut hasher = Md5::new();
        hasher.update(b"OfflinePlayer:");
        hasher.update(display_name.as_bytes());
        let digest: [u8; 16] = hasher.finalize().into();
        IdentityId::from_uuid(Builder::from_md5_bytes(digest).into_uuid())
    }
}

impl IdentityResolver for OfflineIdentityResolver {
    fn resolve(&self, display_name: &str) -> Option<IdentityId> {
        if display_name.is_empty() {
            return None;
        }
        Some(Self::identity_of(display_name))
    }
}

/// Resolver backed by names the host has already seen, e.g. at login
///
/// Lookups are case-insensitive. Unknown names fall through to `fallback`
/// when one is set.
#[derive(Default)]
pub struct KnownIdentityResolver {
    known: RwLock<HashMap<String, IdentityId>>,
    fallback: Option<Box<dyn IdentityResolver>>,
}

impl KnownIdentityResolver {
    /// Empty resolver with no fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty resolver deferring unknown names to `fallback`
    pub fn with_fallback(fallback: impl IdentityResolver + 'static) -> Self {
        Self {
            known: RwLock::new(HashMap::new()),
            fallback: Some(Box::new(fallback)),
        }
    }

    /// Remember an identity for a name
    pub fn remember(&self, display_name: &str, id: IdentityId) {
        self.known.write().insert(display_name.to_lowercase(), id);
    }

    /// Forget a name
    pub fn forget(&self, display_name: &str) -> Option<IdentityId> {
        self.known.write().remove(&display_name.to_lowercase())
    }
}

impl IdentityResolver for KnownIdentityResolver {
    fn resolve(&self, display_name: &str) -> Option<IdentityId> {
        if let Some(id) = self.known.read().get(&display_name.to_lowercase()) {
            return Some(*id);
        }
        self.fallback.as_ref().and_then(|f| f.resolve(display_name))
    }
}

impl std::fmt::Debug for KnownIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnownIdentityResolver")
            .field("known", &self.known.read().len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_ids_are_version_3_and_stable() {
        let a = OfflineIdentityResolver.resolve("Notch").unwrap();
        let b = OfflineIdentityResolver.resolve("Notch").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 3);
        assert_ne!(a, OfflineIdentityResolver.resolve("notch").unwrap());
    }

    #[test]
    fn offline_id_matches_known_value() {
        // Offline-mode id of "Notch" as assigned by vanilla servers.
        let id = OfflineIdentityResolver::identity_of("Notch");
        assert_eq!(id.to_string(), "b50ad385-829d-3141-a216-7e7d7539ba7f");
    }

    #[test]
    fn empty_name_does_not_resolve() {
        assert!(OfflineIdentityResolver.resolve("").is_none());
    }

    #[test]
    fn known_names_win_over_fallback() {
        let resolver = KnownIdentityResolver::with_fallback(OfflineIdentityResolver);
        let id = IdentityId::new();
        resolver.remember("Steve", id);
        assert_eq!(resolver.resolve("steve"), Some(id));
        assert_eq!(
            resolver.resolve("Alex"),
            Some(OfflineIdentityResolver::identity_of("Alex"))
        );
        assert_eq!(resolver.forget("STEVE"), Some(id));
        assert!(KnownIdentityResolver::new().resolve("Steve").is_none());
    }
}
