//! Control-component side of a broadcast.
//!
//! A node answers requests on its own request channels, at most once per
//! (context id, context) identity: a redelivered or re-dispatched request is
//! answered from the node's own ledger instead of being recomputed.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Message, MessageBus, MessageHandler};
use crate::ledger::{CommandKey, CommandLedger, LedgerError, NodeId, SaveRequestOutcome};
use crate::orchestration::envelope::{EnvelopeError, NodeRequest, NodeResponse};
use crate::topology::{NodeTopologyResolver, TopologyError};
use crate::utils::payload_digest;

/// Result type for node-side processing.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Error returned by a request processor.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The identity was already processed for a different request payload.
    #[error("Request [{key}] previously processed with a different payload: stored {stored_digest}, received {received_digest}")]
    RequestMismatch {
        key: CommandKey,
        stored_digest: String,
        received_digest: String,
    },

    #[error("Failed to obtain response payload [{key}]: {source}")]
    Task {
        key: CommandKey,
        #[source]
        source: TaskError,
    },

    #[error("Request addressed to node {received} delivered to node {expected}")]
    WrongNode { expected: NodeId, received: NodeId },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// The work a node performs for one request.
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(&self, key: &CommandKey, payload: &[u8]) -> std::result::Result<Vec<u8>, TaskError>;
}

/// Simulation processor: answers with its node id and the request payload.
pub struct EchoProcessor {
    node_id: NodeId,
}

impl EchoProcessor {
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }
}

#[async_trait]
impl RequestProcessor for EchoProcessor {
    async fn process(&self, _key: &CommandKey, payload: &[u8]) -> std::result::Result<Vec<u8>, TaskError> {
        let mut response = format!("node-{}:", self.node_id).into_bytes();
        response.extend_from_slice(payload);
        Ok(response)
    }
}

/// Runs node-side tasks at most once per identity, backed by the node's ledger.
#[derive(Clone)]
pub struct ExactlyOnceProcessor {
    node_id: NodeId,
    ledger: Arc<CommandLedger>,
}

impl ExactlyOnceProcessor {
    pub fn new(node_id: NodeId, ledger: Arc<CommandLedger>) -> Self {
        Self { node_id, ledger }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Return the stored response for an identical earlier request, or run
    /// `task` and record its response.
    ///
    /// Fails with `RequestMismatch` when the identity was seen with a
    /// different request payload.
    pub async fn process<F, Fut>(
        &self,
        correlation_id: &str,
        context_id: &str,
        context: &str,
        request_payload: &[u8],
        task: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, TaskError>>,
    {
        let key = CommandKey::new(context_id, context, self.node_id);

        if let Some(existing) = self.ledger.find_command(&key).await? {
            if existing.request_payload != request_payload {
                return Err(NodeError::RequestMismatch {
                    stored_digest: payload_digest(&existing.request_payload),
                    received_digest: payload_digest(request_payload),
                    key,
                });
            }
            if let Some(response) = existing.response_payload {
                debug!(command = %key, "Answering from stored response");
                return Ok(response);
            }
            // Request recorded but never answered: finish it.
            return self.run(&key, task).await;
        }

        match self
            .ledger
            .save_request(&key, correlation_id, request_payload)
            .await?
        {
            SaveRequestOutcome::ReuseCompleted(response) => Ok(response),
            SaveRequestOutcome::Stored | SaveRequestOutcome::ReusePending { .. } => {
                self.run(&key, task).await
            }
        }
    }

    async fn run<F, Fut>(&self, key: &CommandKey, task: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, TaskError>>,
    {
        let response = task().await.map_err(|source| NodeError::Task {
            key: key.clone(),
            source,
        })?;
        let saved = self.ledger.save_response(key, &response).await?;
        Ok(saved.command().response_payload.clone().unwrap_or(response))
    }
}

/// Answers one node's request channels.
pub struct NodeWorker {
    node_id: NodeId,
    subscriptions: usize,
}

impl NodeWorker {
    /// Subscribe to every request channel of `node_id`.
    pub async fn start(
        node_id: NodeId,
        bus: Arc<dyn MessageBus>,
        topology: &NodeTopologyResolver,
        ledger: Arc<CommandLedger>,
        processor: Arc<dyn RequestProcessor>,
    ) -> Result<Self> {
        let routes = topology.routes_for(node_id)?;
        let exactly_once = ExactlyOnceProcessor::new(node_id, ledger);

        for route in &routes {
            let handler = NodeRequestHandler {
                exactly_once: exactly_once.clone(),
                processor: processor.clone(),
                bus: bus.clone(),
                response_channel: route.response_channel.clone(),
            };
            bus.subscribe(&route.request_channel, Arc::new(handler)).await?;
        }

        info!(node_id, subscriptions = routes.len(), "Node worker started");

        Ok(Self {
            node_id,
            subscriptions: routes.len(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions
    }
}

struct NodeRequestHandler {
    exactly_once: ExactlyOnceProcessor,
    processor: Arc<dyn RequestProcessor>,
    bus: Arc<dyn MessageBus>,
    response_channel: String,
}

impl NodeRequestHandler {
    async fn answer(
        exactly_once: &ExactlyOnceProcessor,
        processor: &dyn RequestProcessor,
        bus: &dyn MessageBus,
        response_channel: &str,
        message: &Message,
    ) -> Result<()> {
        let request = NodeRequest::decode(&message.body)?;
        if request.node_id != exactly_once.node_id() {
            return Err(NodeError::WrongNode {
                expected: exactly_once.node_id(),
                received: request.node_id,
            });
        }

        let key = request.key();
        let response = exactly_once
            .process(
                &message.correlation_id,
                &request.context_id,
                &request.context,
                &request.payload,
                || processor.process(&key, &request.payload),
            )
            .await?;

        let body = NodeResponse::new(&key, response).encode()?;
        bus.publish(Message::new(response_channel, &message.correlation_id, body))
            .await?;
        debug!(command = %key, correlation_id = %message.correlation_id, "Response published");
        Ok(())
    }
}

impl MessageHandler for NodeRequestHandler {
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, crate::bus::Result<()>> {
        let exactly_once = self.exactly_once.clone();
        let processor = self.processor.clone();
        let bus = self.bus.clone();
        let response_channel = self.response_channel.clone();

        Box::pin(async move {
            let result = Self::answer(
                &exactly_once,
                processor.as_ref(),
                bus.as_ref(),
                &response_channel,
                &message,
            )
            .await;

            match result {
                Ok(()) => Ok(()),
                Err(e @ (NodeError::RequestMismatch { .. } | NodeError::WrongNode { .. })) => {
                    warn!(
                        target: "integrity",
                        channel = %message.channel,
                        correlation_id = %message.correlation_id,
                        error = %e,
                        "Request rejected"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(channel = %message.channel, error = %e, "Failed to answer request");
                    Err(BusError::Handler {
                        channel: message.channel.clone(),
                        message: e.to_string(),
                    })
                }
            }
        })
    }
}
