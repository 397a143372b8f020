//! SQLite storage integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses a temporary database file, no external dependencies required.

mod storage;

use std::sync::Arc;

use broadcast_orchestrator::ledger::{CommandKey, CommandLedger, LedgerConfig, SaveRequestOutcome};
use broadcast_orchestrator::storage::{CommandStore, SqliteCommandStore};

async fn temp_store(dir: &tempfile::TempDir) -> SqliteCommandStore {
    let path = dir.path().join("ledger").join("commands.db");
    SqliteCommandStore::connect(path.to_str().expect("utf-8 temp path"))
        .await
        .expect("Failed to open SQLite command store")
}

#[tokio::test]
async fn test_sqlite_command_store() {
    println!("=== SQLite CommandStore Tests ===");

    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir).await;

    run_command_store_tests!(&store);

    println!("=== All SQLite CommandStore tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let key = CommandKey::new("e3e3c2fd8a16489291c5c24e7b74b26e", storage::command_store_tests::CONTEXT, 2);

    {
        let store: Arc<dyn CommandStore> = Arc::new(temp_store(&dir).await);
        let ledger = CommandLedger::new(store, LedgerConfig::default());
        ledger.save_request(&key, "corr-1", b"request").await.unwrap();
        ledger.save_response(&key, b"response").await.unwrap();
    }

    let store: Arc<dyn CommandStore> = Arc::new(temp_store(&dir).await);
    let ledger = CommandLedger::new(store, LedgerConfig::default());

    let outcome = ledger.save_request(&key, "corr-2", b"request").await.unwrap();
    assert_eq!(outcome, SaveRequestOutcome::ReuseCompleted(b"response".to_vec()));
    assert_eq!(ledger.count_responses("corr-1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_sqlite_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = temp_store(&dir).await;
    store.init().await.expect("second schema init should succeed");
}
