//! Durable command storage.
//!
//! This module contains:
//! - `CommandStore` trait: keyed store underneath the command ledger
//! - Storage configuration types
//! - Implementations: SQLite, Mock (in-memory)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::ledger::{Command, CommandKey};

// Implementation modules
pub mod mock;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-exports
pub use mock::MockCommandStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCommandStore;

// ============================================================================
// Traits
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A conditional write lost a race. `expected` is `None` for inserts.
    #[error("Version conflict on command [{key}]: expected version {expected:?}")]
    VersionConflict {
        key: CommandKey,
        expected: Option<u64>,
    },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage type '{0}' requires a feature that is not enabled")]
    FeatureDisabled(String),
}

impl StorageError {
    /// Whether this error is a lost optimistic-concurrency race.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }
}

/// Keyed command store with unique identity and version-conditioned writes.
///
/// Implementations:
/// - `SqliteCommandStore`: SQLite storage
/// - `MockCommandStore`: In-memory storage for standalone and tests
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Load the command for an identity.
    async fn get(&self, key: &CommandKey) -> Result<Option<Command>>;

    /// Insert a new command.
    ///
    /// Fails with `VersionConflict` if a command already exists for the identity.
    async fn insert(&self, command: &Command) -> Result<()>;

    /// Record a response, conditioned on the command still being at
    /// `expected_version` with no response stored.
    ///
    /// Returns the updated command (version bumped).
    async fn set_response(
        &self,
        key: &CommandKey,
        expected_version: u64,
        payload: &[u8],
        responded_at: DateTime<Utc>,
    ) -> Result<Command>;

    /// Whether any node holds a command for this operation instance.
    async fn exists_for_context(&self, context_id: &str, context: &str) -> Result<bool>;

    /// All commands for an operation instance, ordered by node id.
    async fn find_by_context(&self, context_id: &str, context: &str) -> Result<Vec<Command>>;

    /// All commands created by one broadcast, ordered by node id.
    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Command>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// SQLite file database.
    #[default]
    Sqlite,
    /// In-memory store (lost on restart).
    Memory,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Sqlite => write!(f, "sqlite"),
            StorageType::Memory => write!(f, "memory"),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Path to database file (sqlite only).
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            path: "./data/commands.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// In-memory storage, for tests and throwaway runs.
    pub fn memory() -> Self {
        Self {
            storage_type: StorageType::Memory,
            path: String::new(),
        }
    }

    /// SQLite storage at the given path.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            path: path.into(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the command store based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn CommandStore>> {
    info!(storage_type = %config.storage_type, path = %config.path, "Initializing command store");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MockCommandStore::new())),
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let store = SqliteCommandStore::connect(&config.path).await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err(StorageError::FeatureDisabled("sqlite".to_string()))
            }
        }
    }
}
