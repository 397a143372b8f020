//! Process wiring: every component built once from configuration and
//! passed explicitly to the components that use it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::{init_bus, BusError, MessageBus};
use crate::config::Config;
use crate::ledger::{CommandLedger, LedgerConfig};
use crate::node::{EchoProcessor, NodeError, NodeWorker};
use crate::orchestration::{subscribe_collectors, CorrelationRegistry, RequestDispatcher, ResponseCollector};
use crate::storage::{init_storage, MockCommandStore, StorageError};
use crate::topology::{NodeTopologyResolver, TopologyError};

/// Result type for runtime construction.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// A running orchestrator: ledger, registry, topology, bus and collectors.
pub struct OrchestratorRuntime {
    config: Config,
    ledger: Arc<CommandLedger>,
    registry: CorrelationRegistry,
    topology: Arc<NodeTopologyResolver>,
    bus: Arc<dyn MessageBus>,
    sweeper: JoinHandle<()>,
    nodes: Vec<NodeWorker>,
}

impl OrchestratorRuntime {
    /// Build every component from configuration, subscribe collectors to
    /// every response channel and start the registry sweeper.
    pub async fn start(config: Config) -> Result<Self> {
        let bus = init_bus(&config.messaging)?;
        Self::start_with_bus(config, bus).await
    }

    /// `start` over an externally constructed bus.
    pub async fn start_with_bus(config: Config, bus: Arc<dyn MessageBus>) -> Result<Self> {
        let topology = Arc::new(NodeTopologyResolver::new(&config.topology)?);
        let store = init_storage(&config.storage).await?;
        let ledger = Arc::new(CommandLedger::new(store, config.ledger.clone()));
        let registry = CorrelationRegistry::new();

        let collector = ResponseCollector::new(ledger.clone(), registry.clone());
        let subscriptions = subscribe_collectors(bus.as_ref(), &topology, &collector).await?;
        let sweeper = registry.spawn_sweeper(config.dispatch.sweep_interval());

        info!(
            nodes = topology.node_count(),
            operations = topology.operation_names().len(),
            subscriptions,
            deadline = ?config.dispatch.deadline(),
            "Orchestrator runtime started"
        );

        let mut runtime = Self {
            config,
            ledger,
            registry,
            topology,
            bus,
            sweeper,
            nodes: Vec::new(),
        };

        if runtime.config.simulation.enabled {
            runtime.spawn_simulated_nodes().await?;
        }

        Ok(runtime)
    }

    /// Start an echoing node worker, each with its own in-memory ledger, for
    /// every configured node that is not running yet.
    pub async fn spawn_simulated_nodes(&mut self) -> Result<usize> {
        let mut started = 0;
        for &node_id in self.topology.node_ids() {
            if self.nodes.iter().any(|n| n.node_id() == node_id) {
                continue;
            }
            let ledger = Arc::new(CommandLedger::new(
                Arc::new(MockCommandStore::new()),
                LedgerConfig::default(),
            ));
            let worker = NodeWorker::start(
                node_id,
                self.bus.clone(),
                &self.topology,
                ledger,
                Arc::new(EchoProcessor::new(node_id)),
            )
            .await?;
            self.nodes.push(worker);
            started += 1;
        }
        info!(started, "Simulated nodes running");
        Ok(started)
    }

    /// A dispatcher using the configured default deadline.
    pub fn dispatcher(&self) -> RequestDispatcher {
        RequestDispatcher::new(
            self.ledger.clone(),
            self.registry.clone(),
            self.topology.clone(),
            self.bus.clone(),
            self.config.dispatch.deadline(),
        )
    }

    pub fn ledger(&self) -> &Arc<CommandLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn topology(&self) -> &Arc<NodeTopologyResolver> {
        &self.topology
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the sweeper after a last eviction of overdue aggregations.
    pub async fn shutdown(self) {
        self.sweeper.abort();
        let evicted = self.registry.evict_expired().await;
        info!(
            in_flight = self.registry.in_flight().await,
            evicted,
            "Orchestrator runtime stopped"
        );
    }
}
