//! Response collection from node response channels.
//!
//! One handler is subscribed per node response channel. Each inbound reply
//! is recorded durably in the ledger first, then offered to the correlation
//! registry. Protocol violations are logged under the `integrity` target and
//! dropped; nothing here is retried.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::correlation::{CorrelationRegistry, RecordOutcome};
use super::envelope::{EnvelopeError, NodeResponse};
use crate::bus::{BusError, Message, MessageBus, MessageHandler};
use crate::ledger::{CommandLedger, LedgerError, NodeId, SaveResponseOutcome};
use crate::topology::NodeTopologyResolver;

/// Result type for collection.
pub type Result<T> = std::result::Result<T, CollectError>;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Undecodable response on node {node_id} channel: {source}")]
    Envelope {
        node_id: NodeId,
        #[source]
        source: EnvelopeError,
    },

    #[error("Response body claims node {body_node_id} on node {channel_node_id} channel")]
    NodeMismatch {
        channel_node_id: NodeId,
        body_node_id: NodeId,
    },

    #[error("Response on node {node_id} channel has no correlation id")]
    MissingCorrelation { node_id: NodeId },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CollectError {
    /// Protocol-integrity violations, as opposed to operational failures.
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            CollectError::Ledger(e) => e.is_integrity_violation(),
            _ => true,
        }
    }
}

/// Records node replies in the ledger and the correlation registry.
#[derive(Clone)]
pub struct ResponseCollector {
    ledger: Arc<CommandLedger>,
    registry: CorrelationRegistry,
}

impl ResponseCollector {
    pub fn new(ledger: Arc<CommandLedger>, registry: CorrelationRegistry) -> Self {
        Self { ledger, registry }
    }

    /// Process one message from `node_id`'s response channel.
    #[tracing::instrument(
        name = "collector.collect",
        skip_all,
        fields(node_id = node_id, correlation_id = %message.correlation_id)
    )]
    pub async fn collect(&self, node_id: NodeId, message: &Message) -> Result<RecordOutcome> {
        let response = NodeResponse::decode(&message.body)
            .map_err(|source| CollectError::Envelope { node_id, source })?;

        if response.node_id != node_id {
            return Err(CollectError::NodeMismatch {
                channel_node_id: node_id,
                body_node_id: response.node_id,
            });
        }
        if message.correlation_id.is_empty() {
            return Err(CollectError::MissingCorrelation { node_id });
        }

        let key = response.key();
        let saved = self.ledger.save_response(&key, &response.payload).await?;
        if let SaveResponseOutcome::AlreadyRecorded(_) = saved {
            debug!(command = %key, "Redelivered response");
        }

        // The ledger owns the correlation of record.
        let correlation_id = &saved.command().correlation_id;
        if *correlation_id != message.correlation_id {
            warn!(
                command = %key,
                recorded = %correlation_id,
                received = %message.correlation_id,
                "Response correlation id differs from recorded request"
            );
        }

        let outcome = self
            .registry
            .record_reply(correlation_id, node_id, &response.payload)
            .await;
        debug!(command = %key, ?outcome, "Response collected");
        Ok(outcome)
    }

    /// A bus handler bound to one node's response channel.
    pub fn for_node(&self, node_id: NodeId) -> NodeResponseHandler {
        NodeResponseHandler {
            collector: self.clone(),
            node_id,
        }
    }
}

/// `ResponseCollector` bound to one node.
pub struct NodeResponseHandler {
    collector: ResponseCollector,
    node_id: NodeId,
}

impl MessageHandler for NodeResponseHandler {
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, crate::bus::Result<()>> {
        let collector = self.collector.clone();
        let node_id = self.node_id;
        Box::pin(async move {
            match collector.collect(node_id, &message).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_integrity_violation() => {
                    error!(
                        target: "integrity",
                        channel = %message.channel,
                        correlation_id = %message.correlation_id,
                        node_id,
                        error = %e,
                        "Protocol integrity violation, response dropped"
                    );
                    Ok(())
                }
                Err(e) => Err(BusError::Handler {
                    channel: message.channel.clone(),
                    message: e.to_string(),
                }),
            }
        })
    }
}

/// Subscribe one collector handler to every node response channel.
///
/// Returns the number of subscriptions made.
pub async fn subscribe_collectors(
    bus: &dyn MessageBus,
    topology: &NodeTopologyResolver,
    collector: &ResponseCollector,
) -> crate::bus::Result<usize> {
    let channels = topology.response_channels();
    for channel in &channels {
        bus.subscribe(&channel.channel, Arc::new(collector.for_node(channel.node_id)))
            .await?;
    }
    debug!(subscriptions = channels.len(), "Response collectors subscribed");
    Ok(channels.len())
}
