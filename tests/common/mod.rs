//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::Once;

use tempfile::TempDir;
use tessera::{IdentityId, Tessera};

static INIT_LOGGING: Once = Once::new();

/// Route tracing output through the test harness, once per binary
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .try_init();
    });
}

/// Definitions used across the suites
pub const ATTRIBUTES: &str = r#"
[coins]
type = "int"
default = 0

[rank]
type = "ladder"
ladder = ["member", "vip", "premium", "admin"]
default = "member"

[colors]
type = "multienum"
values = ["red", "blue", "green"]

[nickname]
type = "string"

[partner]
type = "uuid"

[fly]
type = "permission"
default = false
permission-node = "tessera.fly"
"#;

// ============================================================================
// TestStore - file-backed store in a temp directory
// ============================================================================

/// File-backed store that lives as long as its temp directory
pub struct TestStore {
    pub store: Tessera,
    pub dir: TempDir,
}

impl TestStore {
    /// Fresh SQLite store with [`ATTRIBUTES`]
    pub fn new() -> Self {
        init_logging();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(dir.path().join(tessera::ATTRIBUTES_FILE_NAME), ATTRIBUTES)
            .expect("Failed to write attributes file");
        let store = Tessera::open(dir.path()).expect("Failed to open test store");
        TestStore { store, dir }
    }

    /// Shut down and open again over the same directory
    pub fn reopen(self) -> Self {
        self.store.shutdown().expect("Failed to shut down test store");
        let TestStore { store, dir } = self;
        drop(store);
        let store = Tessera::open(dir.path()).expect("Failed to reopen test store");
        TestStore { store, dir }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Tessera;

    fn deref(&self) -> &Tessera {
        &self.store
    }
}

/// Offline id for a display name
pub fn offline(name: &str) -> IdentityId {
    tessera::OfflineIdentityResolver::identity_of(name)
}
