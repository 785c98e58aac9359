//! Configuration files written and honored by `Tessera::open`

use tempfile::TempDir;
use tessera::{BackendKind, Tessera, TesseraConfig, CONFIG_FILE_NAME};

#[test]
fn sqlite_filename_comes_from_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[database.sqlite]\nfilename = \"custom.db\"\n",
    )
    .unwrap();

    let t = Tessera::open(dir.path()).unwrap();
    assert!(dir.path().join("custom.db").exists());
    assert!(!dir.path().join("playerdata.db").exists());
    assert_eq!(t.config().database.kind, BackendKind::Sqlite);
    t.shutdown().unwrap();
}

#[test]
fn invalid_config_aborts_open() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[settings]\nworker_threads = 0\n",
    )
    .unwrap();
    assert!(Tessera::open(dir.path()).is_err());
}

#[test]
fn explicit_config_is_used() {
    let dir = TempDir::new().unwrap();
    let mut config = TesseraConfig::default();
    config.settings.worker_threads = 2;
    config.settings.debug = true;

    let t = Tessera::open_with_config(dir.path(), config).unwrap();
    assert_eq!(t.stats().unwrap().scheduler.worker_count, 2);
    assert!(!dir.path().join(CONFIG_FILE_NAME).exists());
    t.shutdown().unwrap();
}
