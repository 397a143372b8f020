//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::MessagingConfig;
use crate::ledger::LedgerConfig;
use crate::storage::StorageConfig;
use crate::topology::TopologyConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ORCHESTRATOR_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ORCHESTRATOR";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ORCHESTRATOR_LOG";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Dispatch timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default time a broadcast waits for every node.
    pub deadline_secs: u64,
    /// How often the registry evicts expired aggregations.
    pub sweep_interval_millis: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 30,
            sweep_interval_millis: 500,
        }
    }
}

impl DispatchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_millis)
    }
}

/// In-process simulated control components.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Start an echoing node worker for every configured node.
    pub enabled: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command ledger storage.
    pub storage: StorageConfig,
    /// Message bus.
    pub messaging: MessagingConfig,
    /// Nodes and operation channel naming.
    pub topology: TopologyConfig,
    /// Dispatch deadline and registry sweep.
    pub dispatch: DispatchConfig,
    /// Ledger retry policy.
    pub ledger: LedgerConfig,
    /// Simulated nodes.
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("topology.node_ids"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.deadline_secs must be positive".to_string(),
            ));
        }
        if self.dispatch.sweep_interval_millis == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.sweep_interval_millis must be positive".to_string(),
            ));
        }
        if self.messaging.channel.capacity == 0 {
            return Err(ConfigError::Invalid(
                "messaging.channel.capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing: in-memory ledger, simulated nodes.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::memory(),
            simulation: SimulationConfig { enabled: true },
            ..Self::default()
        }
    }
}
