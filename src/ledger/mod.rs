//! Command ledger: durable request/response pairs.
//!
//! The ledger is the source of truth for idempotency and crash recovery.
//! Every mutation follows a read-decide-write protocol conditioned on the
//! command's version; a lost race re-runs the whole decision, bounded by
//! `LedgerConfig::max_retries`, before surfacing `LockConflict`.
//!
//! Dedup categories over existing commands:
//! - **identical**: same identity and same correlation id (retransmission)
//! - **semantically identical**: same identity, different correlation id
//!   (the operation was requested again)

mod command;

use std::future::Future;
use std::sync::Arc;

use backon::Retryable;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub use command::{Command, CommandKey, CommandState, NodeId};

use crate::storage::{CommandStore, StorageError};
use crate::utils::payload_digest;
use crate::utils::retry::{is_retryable_ledger_error, ledger_backoff};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A response arrived for an identity the ledger never recorded.
    #[error("Could not find a matching request [{key}]")]
    NoMatchingRequest { key: CommandKey },

    /// A different response is already stored for the identity.
    #[error("Conflicting response [{key}]: stored {stored_digest}, received {received_digest}")]
    ResponseConflict {
        key: CommandKey,
        stored_digest: String,
        received_digest: String,
    },

    /// Version-conditioned writes kept losing races.
    #[error("Lock conflict [{key}] after {attempts} attempts")]
    LockConflict { key: CommandKey, attempts: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Protocol-integrity violations, as opposed to operational failures.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            LedgerError::NoMatchingRequest { .. } | LedgerError::ResponseConflict { .. }
        )
    }
}

/// Outcome of recording a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveRequestOutcome {
    /// A new command was created in state `New`.
    Stored,
    /// The identity already completed; reuse the stored response, do not publish.
    ReuseCompleted(Vec<u8>),
    /// The identity is in flight under `correlation_id`; join it, do not publish.
    ReusePending { correlation_id: String },
}

/// Outcome of recording a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResponseOutcome {
    /// The response was stored (`New -> Completed`).
    Recorded(Command),
    /// An equal response was already stored (benign redelivery).
    AlreadyRecorded(Command),
}

impl SaveResponseOutcome {
    pub fn command(&self) -> &Command {
        match self {
            SaveResponseOutcome::Recorded(c) | SaveResponseOutcome::AlreadyRecorded(c) => c,
        }
    }
}

/// Ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Retries of the read-decide-write step after a lost version race.
    pub max_retries: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// Durable ledger of request/response pairs.
pub struct CommandLedger {
    store: Arc<dyn CommandStore>,
    config: LedgerConfig,
}

impl CommandLedger {
    pub fn new(store: Arc<dyn CommandStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Record a request for one node, applying the dedup rules.
    pub async fn save_request(
        &self,
        key: &CommandKey,
        correlation_id: &str,
        payload: &[u8],
    ) -> Result<SaveRequestOutcome> {
        self.with_retry(key, || self.try_save_request(key, correlation_id, payload))
            .await
    }

    /// Record a node's response.
    ///
    /// Idempotent for an equal payload; a different payload is never overwritten.
    pub async fn save_response(&self, key: &CommandKey, payload: &[u8]) -> Result<SaveResponseOutcome> {
        self.with_retry(key, || self.try_save_response(key, payload))
            .await
    }

    /// The command for `key` created by the broadcast `correlation_id`, if any.
    pub async fn find_identical_command(
        &self,
        key: &CommandKey,
        correlation_id: &str,
    ) -> Result<Option<Command>> {
        Ok(self
            .store
            .get(key)
            .await?
            .filter(|c| c.correlation_id == correlation_id))
    }

    /// The command for `key` created by any broadcast other than `excluding_correlation_id`.
    pub async fn find_semantically_identical_command(
        &self,
        key: &CommandKey,
        excluding_correlation_id: &str,
    ) -> Result<Option<Command>> {
        Ok(self
            .store
            .get(key)
            .await?
            .filter(|c| c.correlation_id != excluding_correlation_id))
    }

    /// The command for `key`, whatever broadcast created it.
    pub async fn find_command(&self, key: &CommandKey) -> Result<Option<Command>> {
        Ok(self.store.get(key).await?)
    }

    /// Whether any node has already been asked for this operation instance.
    pub async fn exists_request(&self, context_id: &str, context: &str) -> Result<bool> {
        Ok(self.store.exists_for_context(context_id, context).await?)
    }

    /// All commands of an operation instance, ordered by node id.
    pub async fn find_by_context(&self, context_id: &str, context: &str) -> Result<Vec<Command>> {
        Ok(self.store.find_by_context(context_id, context).await?)
    }

    /// All commands created by one broadcast, ordered by node id.
    pub async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Command>> {
        Ok(self.store.find_by_correlation(correlation_id).await?)
    }

    /// Completed commands of one broadcast, ordered by node id.
    pub async fn find_responses(&self, correlation_id: &str) -> Result<Vec<Command>> {
        let mut commands = self.find_by_correlation(correlation_id).await?;
        commands.retain(Command::is_completed);
        Ok(commands)
    }

    /// Number of nodes that have answered one broadcast.
    pub async fn count_responses(&self, correlation_id: &str) -> Result<usize> {
        Ok(self.find_responses(correlation_id).await?.len())
    }

    async fn try_save_request(
        &self,
        key: &CommandKey,
        correlation_id: &str,
        payload: &[u8],
    ) -> Result<SaveRequestOutcome> {
        let Some(existing) = self.store.get(key).await? else {
            let command = Command::new_request(key.clone(), correlation_id, payload.to_vec());
            self.store.insert(&command).await?;
            info!(
                context_id = %key.context_id,
                context = %key.context,
                node_id = key.node_id,
                correlation_id = %correlation_id,
                "Saved request"
            );
            return Ok(SaveRequestOutcome::Stored);
        };

        if existing.request_payload != payload {
            warn!(
                context_id = %key.context_id,
                context = %key.context,
                node_id = key.node_id,
                stored = %payload_digest(&existing.request_payload),
                received = %payload_digest(payload),
                "Request previously recorded with a different payload"
            );
        }

        let identical = existing.correlation_id == correlation_id;
        match existing.response_payload {
            Some(response) => {
                debug!(
                    context_id = %key.context_id,
                    node_id = key.node_id,
                    identical,
                    previous_correlation_id = %existing.correlation_id,
                    "Reusing completed command"
                );
                Ok(SaveRequestOutcome::ReuseCompleted(response))
            }
            None => {
                debug!(
                    context_id = %key.context_id,
                    node_id = key.node_id,
                    identical,
                    previous_correlation_id = %existing.correlation_id,
                    "Joining pending command"
                );
                Ok(SaveRequestOutcome::ReusePending {
                    correlation_id: existing.correlation_id,
                })
            }
        }
    }

    async fn try_save_response(&self, key: &CommandKey, payload: &[u8]) -> Result<SaveResponseOutcome> {
        let command = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| LedgerError::NoMatchingRequest { key: key.clone() })?;

        match &command.response_payload {
            Some(stored) if stored.as_slice() == payload => {
                debug!(
                    context_id = %key.context_id,
                    node_id = key.node_id,
                    correlation_id = %command.correlation_id,
                    "Response already recorded"
                );
                Ok(SaveResponseOutcome::AlreadyRecorded(command))
            }
            Some(stored) => Err(LedgerError::ResponseConflict {
                key: key.clone(),
                stored_digest: payload_digest(stored),
                received_digest: payload_digest(payload),
            }),
            None => {
                let updated = self
                    .store
                    .set_response(key, command.version, payload, Utc::now())
                    .await?;
                info!(
                    context_id = %key.context_id,
                    context = %key.context,
                    node_id = key.node_id,
                    correlation_id = %updated.correlation_id,
                    "Saved response"
                );
                Ok(SaveResponseOutcome::Recorded(updated))
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, key: &CommandKey, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        operation
            .retry(ledger_backoff(self.config.max_retries))
            .when(is_retryable_ledger_error)
            .notify(|err, delay| {
                debug!(command = %key, error = %err, ?delay, "Lost version race, retrying");
            })
            .await
            .map_err(|err| {
                if is_retryable_ledger_error(&err) {
                    let attempts = self.config.max_retries + 1;
                    warn!(command = %key, attempts, "Giving up after repeated version conflicts");
                    LedgerError::LockConflict {
                        key: key.clone(),
                        attempts,
                    }
                } else {
                    err
                }
            })
    }
}

#[cfg(test)]
mod tests;
