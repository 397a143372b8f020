//! Broadcast dispatch: one logical request to every node, one ordered batch back.
//!
//! Per node the ledger decides whether to publish (`Stored`), reuse a stored
//! response (`ReuseCompleted`) or join an earlier broadcast (`ReusePending`).
//! A joined request whose broadcast has no live aggregation was never
//! answered and may never have been delivered, so it is published again
//! under its recorded correlation id; nodes answer repeats from their own
//! ledger. The aggregation is registered before anything is published so no
//! reply can arrive unobserved; joined nodes are reconciled against the
//! ledger once more after publishing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::correlation::{AggregationError, AggregationSpec, CorrelationRegistry, NodeReply};
use super::envelope::{EnvelopeError, NodeRequest};
use crate::bus::{BusError, Message, MessageBus};
use crate::ledger::{CommandKey, CommandLedger, LedgerError, NodeId, SaveRequestOutcome};
use crate::topology::{NodeChannel, NodeTopologyResolver, TopologyError};

/// Result type for dispatch.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors surfaced to the dispatch caller.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(#[from] BusError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("Failed to decode reply from node {node_id}: {message}")]
    Decode { node_id: NodeId, message: String },
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Aggregation(AggregationError::Timeout { .. }))
    }
}

/// Per-node decision taken before anything is published.
struct Plan {
    spec: AggregationSpec,
    publish: Vec<Publication>,
    joined: Vec<CommandKey>,
}

/// One request to send, under the correlation id its ledger row records.
struct Publication {
    channel: NodeChannel,
    key: CommandKey,
    correlation_id: String,
}

/// Broadcasts requests to every node and awaits the ordered batch.
#[derive(Clone)]
pub struct RequestDispatcher {
    ledger: Arc<CommandLedger>,
    registry: CorrelationRegistry,
    topology: Arc<NodeTopologyResolver>,
    bus: Arc<dyn MessageBus>,
    default_deadline: Duration,
}

impl RequestDispatcher {
    pub fn new(
        ledger: Arc<CommandLedger>,
        registry: CorrelationRegistry,
        topology: Arc<NodeTopologyResolver>,
        bus: Arc<dyn MessageBus>,
        default_deadline: Duration,
    ) -> Self {
        Self {
            ledger,
            registry,
            topology,
            bus,
            default_deadline,
        }
    }

    pub fn default_deadline(&self) -> Duration {
        self.default_deadline
    }

    /// Broadcast `payload` to every node for `operation` and return the
    /// replies ordered by node id.
    ///
    /// `deadline` defaults to the dispatcher's configured deadline.
    pub async fn dispatch(
        &self,
        context_id: &str,
        context: &str,
        payload: &[u8],
        operation: &str,
        deadline: Option<Duration>,
    ) -> Result<Vec<Vec<u8>>> {
        let replies = self
            .dispatch_replies(context_id, context, payload, operation, deadline)
            .await?;
        Ok(replies.into_iter().map(|r| r.payload).collect())
    }

    /// `dispatch`, then decode each reply with `decode`.
    pub async fn dispatch_with<T, E, F>(
        &self,
        context_id: &str,
        context: &str,
        payload: &[u8],
        operation: &str,
        deadline: Option<Duration>,
        decode: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(&[u8]) -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let replies = self
            .dispatch_replies(context_id, context, payload, operation, deadline)
            .await?;
        replies
            .iter()
            .map(|reply| {
                decode(&reply.payload).map_err(|e| DispatchError::Decode {
                    node_id: reply.node_id,
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// `dispatch`, keeping the node id with each reply.
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip_all,
        fields(context_id = %context_id, context = %context, operation = %operation)
    )]
    pub async fn dispatch_replies(
        &self,
        context_id: &str,
        context: &str,
        payload: &[u8],
        operation: &str,
        deadline: Option<Duration>,
    ) -> Result<Vec<NodeReply>> {
        let channels = self.topology.resolve(operation)?;
        let correlation_id = Uuid::new_v4().to_string();
        let deadline = deadline.unwrap_or(self.default_deadline);

        if self.ledger.exists_request(context_id, context).await? {
            warn!(
                correlation_id = %correlation_id,
                "Operation instance already requested, reusing recorded commands"
            );
        }

        let plan = self
            .plan(context_id, context, payload, &correlation_id, channels, deadline)
            .await?;
        let handle = self.registry.register(plan.spec).await?;

        for publication in &plan.publish {
            if let Err(e) = self.publish(publication, payload).await {
                self.registry.cancel(&correlation_id).await;
                return Err(e);
            }
        }

        if let Err(e) = self.reconcile_joined(&plan.joined).await {
            self.registry.cancel(&correlation_id).await;
            return Err(e);
        }

        info!(
            correlation_id = %correlation_id,
            published = plan.publish.len(),
            joined = plan.joined.len(),
            ?deadline,
            "Broadcast dispatched"
        );

        let replies = handle.wait().await?;
        debug!(correlation_id = %correlation_id, replies = replies.len(), "Broadcast complete");
        Ok(replies)
    }

    async fn plan(
        &self,
        context_id: &str,
        context: &str,
        payload: &[u8],
        correlation_id: &str,
        channels: Vec<NodeChannel>,
        deadline: Duration,
    ) -> Result<Plan> {
        let mut plan = Plan {
            spec: AggregationSpec::new(
                correlation_id,
                channels.iter().map(|c| c.node_id),
                deadline,
            ),
            publish: Vec::new(),
            joined: Vec::new(),
        };

        for channel in channels {
            let key = CommandKey::new(context_id, context, channel.node_id);
            match self.ledger.save_request(&key, correlation_id, payload).await? {
                SaveRequestOutcome::Stored => plan.publish.push(Publication {
                    channel,
                    key,
                    correlation_id: correlation_id.to_string(),
                }),
                SaveRequestOutcome::ReuseCompleted(response) => {
                    debug!(node_id = channel.node_id, "Reusing stored response");
                    plan.spec = plan.spec.with_reply(channel.node_id, response);
                }
                SaveRequestOutcome::ReusePending {
                    correlation_id: pending,
                } => {
                    plan.spec = plan.spec.with_join(channel.node_id, pending.clone());
                    plan.joined.push(key.clone());
                    if self.registry.is_pending(&pending).await {
                        debug!(
                            node_id = channel.node_id,
                            pending_correlation_id = %pending,
                            "Joining in-flight request"
                        );
                    } else {
                        warn!(
                            node_id = channel.node_id,
                            pending_correlation_id = %pending,
                            "Unanswered request has no live broadcast, publishing again"
                        );
                        plan.publish.push(Publication {
                            channel,
                            key,
                            correlation_id: pending,
                        });
                    }
                }
            }
        }

        Ok(plan)
    }

    async fn publish(&self, publication: &Publication, payload: &[u8]) -> Result<()> {
        let Publication {
            channel,
            key,
            correlation_id,
        } = publication;
        let body = NodeRequest::new(key, payload.to_vec()).encode()?;
        self.bus
            .publish(Message::new(&channel.channel, correlation_id, body))
            .await?;
        debug!(
            channel = %channel.channel,
            node_id = channel.node_id,
            correlation_id = %correlation_id,
            "Published request"
        );
        Ok(())
    }

    /// Feed responses that landed for joined nodes before the join was registered.
    async fn reconcile_joined(&self, joined: &[CommandKey]) -> Result<()> {
        for key in joined {
            let Some(command) = self.ledger.find_command(key).await? else {
                continue;
            };
            if let Some(response) = &command.response_payload {
                self.registry
                    .record_reply(&command.correlation_id, key.node_id, response)
                    .await;
            }
        }
        Ok(())
    }
}
