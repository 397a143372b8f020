//! Command record: one (operation instance, node) request/response pair.

use std::fmt;

use chrono::{DateTime, Utc};

/// Identifier of a control component node.
pub type NodeId = u32;

/// Unique identity of a command: at most one command per operation instance per node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey {
    /// Operation instance identifier (e.g. an election event id).
    pub context_id: String,
    /// Logical operation type.
    pub context: String,
    /// Node the command was addressed to.
    pub node_id: NodeId,
}

impl CommandKey {
    pub fn new(context_id: impl Into<String>, context: impl Into<String>, node_id: NodeId) -> Self {
        Self {
            context_id: context_id.into(),
            context: context.into(),
            node_id,
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contextId={}, context={}, nodeId={}",
            self.context_id, self.context, self.node_id
        )
    }
}

/// Lifecycle state of a command. `New -> Completed`, terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Request recorded, no response yet.
    New,
    /// Response recorded.
    Completed,
}

/// Durable record of one node request and (eventually) its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub key: CommandKey,
    /// Correlation id of the broadcast that created this command.
    pub correlation_id: String,
    pub request_payload: Vec<u8>,
    pub requested_at: DateTime<Utc>,
    pub response_payload: Option<Vec<u8>>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: u64,
}

impl Command {
    /// Create a fresh command in state `New`.
    pub fn new_request(
        key: CommandKey,
        correlation_id: impl Into<String>,
        request_payload: Vec<u8>,
    ) -> Self {
        Self {
            key,
            correlation_id: correlation_id.into(),
            request_payload,
            requested_at: Utc::now(),
            response_payload: None,
            responded_at: None,
            version: 0,
        }
    }

    pub fn state(&self) -> CommandState {
        if self.response_payload.is_some() {
            CommandState::Completed
        } else {
            CommandState::New
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state() == CommandState::Completed
    }

    pub fn node_id(&self) -> NodeId {
        self.key.node_id
    }
}
