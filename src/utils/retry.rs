//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Provides the backoff
//! for the ledger's version-conditioned writes and for store connections.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::ledger::LedgerError;

/// Backoff for ledger read-decide-write retries (version conflicts).
///
/// - Min delay: 5ms
/// - Max delay: 500ms
/// - Max attempts: `max_retries` retries after the first attempt
/// - Jitter enabled
pub fn ledger_backoff(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Backoff for store connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Determines if a ledger error is retryable (lost version race only).
///
/// Non-retryable:
/// - `NoMatchingRequest`, `ResponseConflict`: protocol violations, retrying changes nothing.
/// - Storage failures other than version conflicts.
pub fn is_retryable_ledger_error(err: &LedgerError) -> bool {
    match err {
        LedgerError::Storage(storage) => storage.is_version_conflict(),
        _ => false,
    }
}
