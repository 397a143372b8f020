//! broadcast-standalone: orchestrator and simulated nodes in one process.
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: sqlite
//!   path: ./data/commands.db
//!
//! messaging:
//!   type: channel
//!
//! topology:
//!   node_ids: [1, 2, 3, 4]
//!
//! dispatch:
//!   deadline_secs: 30
//!
//! simulation:
//!   enabled: true
//! ```

use tracing::{error, info};

use broadcast_orchestrator::config::Config;
use broadcast_orchestrator::utils::bootstrap::{init_tracing, parse_config_path};
use broadcast_orchestrator::OrchestratorRuntime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        storage_type = %config.storage.storage_type,
        messaging_type = %config.messaging.messaging_type,
        simulation = config.simulation.enabled,
        "Starting broadcast-standalone"
    );

    let runtime = OrchestratorRuntime::start(config).await.map_err(|e| {
        error!("Failed to start orchestrator: {}", e);
        e
    })?;

    info!("broadcast-standalone ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    runtime.shutdown().await;
    Ok(())
}
