use super::*;
use crate::storage::MockCommandStore;

const CONTEXT_ID: &str = "context-id-1";
const CONTEXT: &str = "key-generation";

fn setup() -> (Arc<MockCommandStore>, CommandLedger) {
    let store = Arc::new(MockCommandStore::new());
    let ledger = CommandLedger::new(store.clone(), LedgerConfig { max_retries: 3 });
    (store, ledger)
}

fn key(node_id: NodeId) -> CommandKey {
    CommandKey::new(CONTEXT_ID, CONTEXT, node_id)
}

#[tokio::test]
async fn test_save_request_then_response_roundtrip() {
    let (_, ledger) = setup();

    let outcome = ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();
    assert_eq!(outcome, SaveRequestOutcome::Stored);

    let saved = ledger.save_response(&key(1), b"response").await.unwrap();
    assert!(matches!(saved, SaveResponseOutcome::Recorded(_)));

    let command = ledger.find_command(&key(1)).await.unwrap().unwrap();
    assert_eq!(command.response_payload.as_deref(), Some(&b"response"[..]));
    assert_eq!(command.state(), CommandState::Completed);
    assert!(command.responded_at.is_some());
    assert_eq!(command.version, 1);
}

#[tokio::test]
async fn test_save_response_without_request_fails() {
    let (_, ledger) = setup();

    let err = ledger.save_response(&key(1), b"response").await.unwrap_err();
    assert!(matches!(err, LedgerError::NoMatchingRequest { .. }));
    assert!(err.is_integrity_violation());
}

#[tokio::test]
async fn test_save_response_same_payload_is_idempotent() {
    let (_, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();
    ledger.save_response(&key(1), b"response").await.unwrap();

    let again = ledger.save_response(&key(1), b"response").await.unwrap();
    assert!(matches!(again, SaveResponseOutcome::AlreadyRecorded(_)));
    assert_eq!(again.command().version, 1);
}

#[tokio::test]
async fn test_save_response_different_payload_conflicts() {
    let (_, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();
    ledger.save_response(&key(1), b"response").await.unwrap();

    let err = ledger.save_response(&key(1), b"forged").await.unwrap_err();
    assert!(matches!(err, LedgerError::ResponseConflict { .. }));

    let command = ledger.find_command(&key(1)).await.unwrap().unwrap();
    assert_eq!(command.response_payload.as_deref(), Some(&b"response"[..]));
}

#[tokio::test]
async fn test_save_request_reuses_completed_command() {
    let (_, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();
    ledger.save_response(&key(1), b"response").await.unwrap();

    let outcome = ledger.save_request(&key(1), "corr-2", b"request").await.unwrap();
    assert_eq!(outcome, SaveRequestOutcome::ReuseCompleted(b"response".to_vec()));

    // The first command is untouched.
    let command = ledger.find_command(&key(1)).await.unwrap().unwrap();
    assert_eq!(command.correlation_id, "corr-1");
}

#[tokio::test]
async fn test_save_request_joins_pending_command() {
    let (_, ledger) = setup();
    ledger.save_request(&key(2), "corr-1", b"request").await.unwrap();

    let outcome = ledger.save_request(&key(2), "corr-2", b"request").await.unwrap();
    assert_eq!(
        outcome,
        SaveRequestOutcome::ReusePending {
            correlation_id: "corr-1".to_string()
        }
    );
}

#[tokio::test]
async fn test_identical_retransmission_joins_itself() {
    let (_, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();

    let outcome = ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();
    assert_eq!(
        outcome,
        SaveRequestOutcome::ReusePending {
            correlation_id: "corr-1".to_string()
        }
    );
}

#[tokio::test]
async fn test_find_identical_command() {
    let (_, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();

    assert!(ledger
        .find_identical_command(&key(1), "corr-1")
        .await
        .unwrap()
        .is_some());
    assert!(ledger
        .find_identical_command(&key(1), "corr-2")
        .await
        .unwrap()
        .is_none());
    assert!(ledger
        .find_identical_command(&key(2), "corr-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_find_semantically_identical_command() {
    let (_, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();

    let found = ledger
        .find_semantically_identical_command(&key(1), "corr-2")
        .await
        .unwrap();
    assert_eq!(found.map(|c| c.correlation_id), Some("corr-1".to_string()));

    assert!(ledger
        .find_semantically_identical_command(&key(1), "corr-1")
        .await
        .unwrap()
        .is_none());
    assert!(ledger
        .find_semantically_identical_command(&CommandKey::new("unique-id-2", CONTEXT, 1), "corr-2")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_exists_request() {
    let (_, ledger) = setup();
    assert!(!ledger.exists_request(CONTEXT_ID, CONTEXT).await.unwrap());

    ledger.save_request(&key(3), "corr-1", b"request").await.unwrap();
    assert!(ledger.exists_request(CONTEXT_ID, CONTEXT).await.unwrap());
    assert!(!ledger.exists_request(CONTEXT_ID, "other").await.unwrap());
}

#[tokio::test]
async fn test_find_responses_and_count() {
    let (_, ledger) = setup();
    for node in 1..=4 {
        ledger.save_request(&key(node), "corr-1", b"request").await.unwrap();
    }
    ledger.save_response(&key(3), b"three").await.unwrap();
    ledger.save_response(&key(1), b"one").await.unwrap();

    assert_eq!(ledger.find_by_correlation("corr-1").await.unwrap().len(), 4);
    assert_eq!(ledger.count_responses("corr-1").await.unwrap(), 2);

    let responses = ledger.find_responses("corr-1").await.unwrap();
    let nodes: Vec<NodeId> = responses.iter().map(Command::node_id).collect();
    assert_eq!(nodes, vec![1, 3]);

    assert_eq!(ledger.find_by_context(CONTEXT_ID, CONTEXT).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_version_conflict_is_retried() {
    let (store, ledger) = setup();
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();

    store.inject_version_conflicts(2).await;
    let saved = ledger.save_response(&key(1), b"response").await.unwrap();
    assert!(matches!(saved, SaveResponseOutcome::Recorded(_)));
}

#[tokio::test]
async fn test_persistent_version_conflict_surfaces_lock_conflict() {
    let (store, ledger) = setup();

    store.inject_version_conflicts(100).await;
    let err = ledger.save_request(&key(1), "corr-1", b"request").await.unwrap_err();
    assert!(matches!(err, LedgerError::LockConflict { attempts: 4, .. }));
    assert_eq!(store.command_count().await, 0);
}

#[tokio::test]
async fn test_storage_failure_is_not_retried() {
    let (store, ledger) = setup();
    store.set_fail_on_get(true).await;

    let err = ledger.save_request(&key(1), "corr-1", b"request").await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Unavailable(_))));
}

#[tokio::test]
async fn test_concurrent_same_response_both_succeed() {
    let (_, ledger) = setup();
    let ledger = Arc::new(ledger);
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();

    let a = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.save_response(&key(1), b"same").await })
    };
    let b = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.save_response(&key(1), b"same").await })
    };

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_concurrent_different_responses_exactly_one_wins() {
    let (_, ledger) = setup();
    let ledger = Arc::new(ledger);
    ledger.save_request(&key(1), "corr-1", b"request").await.unwrap();

    let a = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.save_response(&key(1), b"first").await })
    };
    let b = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.save_response(&key(1), b"second").await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::ResponseConflict { .. })))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn test_concurrent_save_request_creates_one_command() {
    let (store, ledger) = setup();
    let ledger = Arc::new(ledger);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .save_request(&key(1), &format!("corr-{}", i), b"request")
                    .await
            })
        })
        .collect();

    let mut stored = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SaveRequestOutcome::Stored => stored += 1,
            SaveRequestOutcome::ReusePending { .. } => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(stored, 1);
    assert_eq!(store.command_count().await, 1);
}
