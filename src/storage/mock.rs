//! In-memory command store.
//!
//! Backs the `memory` storage type and the unit tests. Failures and lost
//! optimistic-concurrency races can be injected.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CommandStore, Result, StorageError};
use crate::ledger::{Command, CommandKey};

/// Mock command store that stores commands in memory.
#[derive(Default)]
pub struct MockCommandStore {
    commands: RwLock<HashMap<CommandKey, Command>>,
    fail_on_get: RwLock<bool>,
    fail_on_write: RwLock<bool>,
    /// Number of upcoming writes that report a version conflict.
    injected_conflicts: RwLock<usize>,
}

impl MockCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    /// Make the next `count` writes lose their race.
    pub async fn inject_version_conflicts(&self, count: usize) {
        *self.injected_conflicts.write().await = count;
    }

    pub async fn command_count(&self) -> usize {
        self.commands.read().await.len()
    }

    async fn check_write(&self, key: &CommandKey, expected: Option<u64>) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(StorageError::Unavailable("Mock write failure".to_string()));
        }
        let mut conflicts = self.injected_conflicts.write().await;
        if *conflicts > 0 {
            *conflicts -= 1;
            return Err(StorageError::VersionConflict {
                key: key.clone(),
                expected,
            });
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("Mock read failure".to_string()));
        }
        Ok(())
    }

    async fn filter_sorted<F>(&self, predicate: F) -> Result<Vec<Command>>
    where
        F: Fn(&Command) -> bool,
    {
        self.check_read().await?;
        let mut found: Vec<Command> = self
            .commands
            .read()
            .await
            .values()
            .filter(|c| predicate(c))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }
}

#[async_trait]
impl CommandStore for MockCommandStore {
    async fn get(&self, key: &CommandKey) -> Result<Option<Command>> {
        self.check_read().await?;
        Ok(self.commands.read().await.get(key).cloned())
    }

    async fn insert(&self, command: &Command) -> Result<()> {
        self.check_write(&command.key, None).await?;
        let mut commands = self.commands.write().await;
        if commands.contains_key(&command.key) {
            return Err(StorageError::VersionConflict {
                key: command.key.clone(),
                expected: None,
            });
        }
        commands.insert(command.key.clone(), command.clone());
        Ok(())
    }

    async fn set_response(
        &self,
        key: &CommandKey,
        expected_version: u64,
        payload: &[u8],
        responded_at: DateTime<Utc>,
    ) -> Result<Command> {
        self.check_write(key, Some(expected_version)).await?;
        let mut commands = self.commands.write().await;
        let conflict = || StorageError::VersionConflict {
            key: key.clone(),
            expected: Some(expected_version),
        };

        let command = commands.get_mut(key).ok_or_else(conflict)?;
        if command.version != expected_version || command.response_payload.is_some() {
            return Err(conflict());
        }

        command.response_payload = Some(payload.to_vec());
        command.responded_at = Some(responded_at);
        command.version += 1;
        Ok(command.clone())
    }

    async fn exists_for_context(&self, context_id: &str, context: &str) -> Result<bool> {
        self.check_read().await?;
        Ok(self
            .commands
            .read()
            .await
            .keys()
            .any(|k| k.context_id == context_id && k.context == context))
    }

    async fn find_by_context(&self, context_id: &str, context: &str) -> Result<Vec<Command>> {
        self.filter_sorted(|c| c.key.context_id == context_id && c.key.context == context)
            .await
    }

    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Command>> {
        if correlation_id.is_empty() {
            return Ok(vec![]);
        }
        self.filter_sorted(|c| c.correlation_id == correlation_id)
            .await
    }
}
