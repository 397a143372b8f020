//! Test utilities and shared fixtures.
//!
//! Handlers and constructors used by the unit tests of several modules.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::bus::{BusError, Message, MessageHandler, Result as BusResult};
use crate::ledger::{CommandLedger, LedgerConfig};
use crate::storage::MockCommandStore;
use crate::topology::{NodeTopologyResolver, TopologyConfig};

/// Handler that records every message it receives.
///
/// A failing handler records the message, then returns an error.
#[derive(Default)]
pub struct RecordingHandler {
    received: Arc<RwLock<Vec<Arc<Message>>>>,
    fail: bool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            received: Arc::default(),
            fail: true,
        })
    }

    pub async fn received(&self) -> Vec<Arc<Message>> {
        self.received.read().await.clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, BusResult<()>> {
        let received = self.received.clone();
        let fail = self.fail;
        Box::pin(async move {
            let channel = message.channel.clone();
            received.write().await.push(message);
            if fail {
                return Err(BusError::Handler {
                    channel,
                    message: "Recording handler failure".to_string(),
                });
            }
            Ok(())
        })
    }
}

/// Ledger over a fresh mock store, with few retries.
pub fn mock_ledger() -> (Arc<MockCommandStore>, Arc<CommandLedger>) {
    let store = Arc::new(MockCommandStore::new());
    let ledger = Arc::new(CommandLedger::new(
        store.clone(),
        LedgerConfig { max_retries: 3 },
    ));
    (store, ledger)
}

/// Resolver over the default four-node topology.
pub fn default_topology() -> Arc<NodeTopologyResolver> {
    // Default configuration is always valid.
    Arc::new(NodeTopologyResolver::new(&TopologyConfig::default()).unwrap())
}
