//! CommandStore interface tests.
//!
//! These tests verify the contract of the CommandStore trait.
//! Each storage implementation should run these tests.

use chrono::Utc;
use uuid::Uuid;

use broadcast_orchestrator::ledger::{Command, CommandKey};
use broadcast_orchestrator::storage::CommandStore;

pub const CONTEXT: &str = "configuration.electioncontext.ElectionContextRequest";

/// Fresh context id so tests sharing a store never collide.
pub fn context_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn make_command(context_id: &str, node_id: u32, correlation_id: &str) -> Command {
    Command::new_request(
        CommandKey::new(context_id, CONTEXT, node_id),
        correlation_id,
        vec![1, 2, 3, node_id as u8],
    )
}

// =============================================================================
// CommandStore::get / insert tests
// =============================================================================

pub async fn test_get_nonexistent<S: CommandStore>(store: &S) {
    let key = CommandKey::new(context_id(), CONTEXT, 1);

    let command = store.get(&key).await.expect("get should succeed");
    assert!(command.is_none(), "nonexistent command should be None");
}

pub async fn test_insert_and_get<S: CommandStore>(store: &S) {
    let ctx = context_id();
    let command = make_command(&ctx, 2, "corr-insert");

    store.insert(&command).await.expect("insert should succeed");

    let loaded = store
        .get(&command.key)
        .await
        .expect("get should succeed")
        .expect("command should exist");

    assert_eq!(loaded.key, command.key);
    assert_eq!(loaded.correlation_id, "corr-insert");
    assert_eq!(loaded.request_payload, vec![1, 2, 3, 2]);
    assert_eq!(loaded.response_payload, None);
    assert_eq!(loaded.responded_at, None);
    assert_eq!(loaded.version, 0);
}

pub async fn test_insert_duplicate_identity_conflicts<S: CommandStore>(store: &S) {
    let ctx = context_id();
    store
        .insert(&make_command(&ctx, 1, "corr-a"))
        .await
        .expect("first insert should succeed");

    let err = store
        .insert(&make_command(&ctx, 1, "corr-b"))
        .await
        .expect_err("second insert should fail");
    assert!(err.is_version_conflict(), "expected version conflict, got {err}");

    let loaded = store
        .get(&CommandKey::new(&ctx, CONTEXT, 1))
        .await
        .expect("get should succeed")
        .expect("command should exist");
    assert_eq!(loaded.correlation_id, "corr-a");
}

pub async fn test_same_context_other_node_is_distinct<S: CommandStore>(store: &S) {
    let ctx = context_id();
    store
        .insert(&make_command(&ctx, 1, "corr"))
        .await
        .expect("insert node 1 should succeed");
    store
        .insert(&make_command(&ctx, 2, "corr"))
        .await
        .expect("insert node 2 should succeed");

    let other_context = CommandKey::new(&ctx, "keygen", 1);
    assert!(store.get(&other_context).await.unwrap().is_none());
}

// =============================================================================
// CommandStore::set_response tests
// =============================================================================

pub async fn test_set_response<S: CommandStore>(store: &S) {
    let ctx = context_id();
    let command = make_command(&ctx, 3, "corr-resp");
    store.insert(&command).await.expect("insert should succeed");

    let updated = store
        .set_response(&command.key, 0, b"node-3-response", Utc::now())
        .await
        .expect("set_response should succeed");
    assert_eq!(updated.version, 1);
    assert_eq!(updated.response_payload.as_deref(), Some(&b"node-3-response"[..]));
    assert!(updated.responded_at.is_some());

    let loaded = store.get(&command.key).await.unwrap().unwrap();
    assert!(loaded.is_completed());
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.request_payload, command.request_payload);
}

pub async fn test_set_response_stale_version_conflicts<S: CommandStore>(store: &S) {
    let ctx = context_id();
    let command = make_command(&ctx, 1, "corr-stale");
    store.insert(&command).await.unwrap();

    let err = store
        .set_response(&command.key, 5, b"late", Utc::now())
        .await
        .expect_err("stale version should fail");
    assert!(err.is_version_conflict());

    let loaded = store.get(&command.key).await.unwrap().unwrap();
    assert!(!loaded.is_completed());
}

pub async fn test_set_response_twice_conflicts<S: CommandStore>(store: &S) {
    let ctx = context_id();
    let command = make_command(&ctx, 1, "corr-twice");
    store.insert(&command).await.unwrap();

    store
        .set_response(&command.key, 0, b"first", Utc::now())
        .await
        .unwrap();
    let err = store
        .set_response(&command.key, 1, b"second", Utc::now())
        .await
        .expect_err("completed command must not be overwritten");
    assert!(err.is_version_conflict());

    let loaded = store.get(&command.key).await.unwrap().unwrap();
    assert_eq!(loaded.response_payload.as_deref(), Some(&b"first"[..]));
}

pub async fn test_set_response_missing_command_fails<S: CommandStore>(store: &S) {
    let key = CommandKey::new(context_id(), CONTEXT, 1);

    let result = store.set_response(&key, 0, b"orphan", Utc::now()).await;
    assert!(result.is_err(), "response for unknown command should fail");
}

// =============================================================================
// Query tests
// =============================================================================

pub async fn test_exists_for_context<S: CommandStore>(store: &S) {
    let ctx = context_id();
    assert!(!store.exists_for_context(&ctx, CONTEXT).await.unwrap());

    store.insert(&make_command(&ctx, 4, "corr")).await.unwrap();

    assert!(store.exists_for_context(&ctx, CONTEXT).await.unwrap());
    assert!(!store.exists_for_context(&ctx, "keygen").await.unwrap());
}

pub async fn test_find_by_context_ordered_by_node<S: CommandStore>(store: &S) {
    let ctx = context_id();
    for node_id in [3, 1, 4, 2] {
        store
            .insert(&make_command(&ctx, node_id, "corr-order"))
            .await
            .unwrap();
    }

    let found = store.find_by_context(&ctx, CONTEXT).await.unwrap();
    let nodes: Vec<u32> = found.iter().map(|c| c.node_id()).collect();
    assert_eq!(nodes, vec![1, 2, 3, 4]);
}

pub async fn test_find_by_correlation<S: CommandStore>(store: &S) {
    let ctx = context_id();
    let correlation_id = Uuid::new_v4().to_string();
    store
        .insert(&make_command(&ctx, 2, &correlation_id))
        .await
        .unwrap();
    store
        .insert(&make_command(&ctx, 1, &correlation_id))
        .await
        .unwrap();
    store
        .insert(&make_command(&ctx, 3, "someone-else"))
        .await
        .unwrap();

    let found = store.find_by_correlation(&correlation_id).await.unwrap();
    let nodes: Vec<u32> = found.iter().map(|c| c.node_id()).collect();
    assert_eq!(nodes, vec![1, 2]);

    assert!(store
        .find_by_correlation(&Uuid::new_v4().to_string())
        .await
        .unwrap()
        .is_empty());
}

/// Run all CommandStore tests against a store.
#[macro_export]
macro_rules! run_command_store_tests {
    ($store:expr) => {
        use $crate::storage::command_store_tests::*;

        test_get_nonexistent($store).await;
        println!("  test_get_nonexistent: PASSED");

        test_insert_and_get($store).await;
        println!("  test_insert_and_get: PASSED");

        test_insert_duplicate_identity_conflicts($store).await;
        println!("  test_insert_duplicate_identity_conflicts: PASSED");

        test_same_context_other_node_is_distinct($store).await;
        println!("  test_same_context_other_node_is_distinct: PASSED");

        test_set_response($store).await;
        println!("  test_set_response: PASSED");

        test_set_response_stale_version_conflicts($store).await;
        println!("  test_set_response_stale_version_conflicts: PASSED");

        test_set_response_twice_conflicts($store).await;
        println!("  test_set_response_twice_conflicts: PASSED");

        test_set_response_missing_command_fails($store).await;
        println!("  test_set_response_missing_command_fails: PASSED");

        test_exists_for_context($store).await;
        println!("  test_exists_for_context: PASSED");

        test_find_by_context_ordered_by_node($store).await;
        println!("  test_find_by_context_ordered_by_node: PASSED");

        test_find_by_correlation($store).await;
        println!("  test_find_by_correlation: PASSED");
    };
}
