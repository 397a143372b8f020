//! Node topology: logical operation name to per-node channel names.
//!
//! A channel name is `<prefix><node id>`; prefixes carry their own separator.
//! Resolution is pure and deterministic over static configuration.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::ledger::NodeId;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors from topology configuration and resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Topology has no nodes configured")]
    NoNodes,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Duplicate operation: {0}")]
    DuplicateOperation(String),

    #[error("Operation '{0}' has an empty channel prefix")]
    EmptyPrefix(String),

    #[error("Unknown node id: {0}")]
    UnknownNode(NodeId),
}

/// One broadcast operation and its channel prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationConfig {
    /// Logical operation name used by callers.
    pub name: String,
    /// Prefix of the per-node request channels.
    pub request_prefix: String,
    /// Prefix of the per-node response channels.
    pub response_prefix: String,
}

impl OperationConfig {
    pub fn new(
        name: impl Into<String>,
        request_prefix: impl Into<String>,
        response_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            request_prefix: request_prefix.into(),
            response_prefix: response_prefix.into(),
        }
    }
}

/// Topology configuration: the fixed node population and the operation table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Control component node ids.
    pub node_ids: Vec<NodeId>,
    /// Broadcast operations.
    pub operations: Vec<OperationConfig>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            node_ids: vec![1, 2, 3, 4],
            operations: default_operations(),
        }
    }
}

/// Operations of the control component deployment.
pub fn default_operations() -> Vec<OperationConfig> {
    vec![
        OperationConfig::new(
            "election-context",
            "configuration.electioncontext.ElectionContextRequest.",
            "configuration.electioncontext.ElectionContextResponse.",
        ),
        OperationConfig::new(
            "gen-keys-ccr",
            "configuration.return-codes.GenKeysCCRRequest.",
            "configuration.return-codes.GenKeysCCRResponse.",
        ),
        OperationConfig::new(
            "gen-enc-long-code-shares",
            "configuration.return-codes.GenEncLongCodeSharesRequest.",
            "configuration.return-codes.GenEncLongCodeSharesResponse.",
        ),
        OperationConfig::new(
            "setup-tally-ccm",
            "configuration.mixing.SetupTallyCCMRequest.",
            "configuration.mixing.SetupTallyCCMResponse.",
        ),
        OperationConfig::new(
            "partial-decrypt-pcc",
            "voting.return-codes.PartialDecryptPCCRequest.",
            "voting.return-codes.PartialDecryptPCCResponse.",
        ),
        OperationConfig::new(
            "create-lcc-share",
            "voting.return-codes.CreateLCCShareRequest.",
            "voting.return-codes.CreateLCCShareResponse.",
        ),
        OperationConfig::new(
            "create-lvcc-share",
            "voting.return-codes.CreateLVCCShareRequest.",
            "voting.return-codes.CreateLVCCShareResponse.",
        ),
        OperationConfig::new(
            "mix-dec-online",
            "tally.mixing.MixDecOnlineRequest.",
            "tally.mixing.MixDecOnlineResponse.",
        ),
    ]
}

/// A node and the channel addressed to (or from) it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChannel {
    pub node_id: NodeId,
    pub channel: String,
}

/// The request and response channel of one operation for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRoute {
    pub operation: String,
    pub request_channel: String,
    pub response_channel: String,
}

/// Channel name for one node under a prefix.
pub fn channel_name(prefix: &str, node_id: NodeId) -> String {
    format!("{}{}", prefix, node_id)
}

/// Resolves operations to ordered per-node channel lists.
#[derive(Debug, Clone)]
pub struct NodeTopologyResolver {
    node_ids: Vec<NodeId>,
    operations: HashMap<String, OperationConfig>,
}

impl NodeTopologyResolver {
    /// Validate the configuration and build the resolver.
    pub fn new(config: &TopologyConfig) -> Result<Self> {
        if config.node_ids.is_empty() {
            return Err(TopologyError::NoNodes);
        }

        let mut seen = BTreeSet::new();
        for node_id in &config.node_ids {
            if !seen.insert(*node_id) {
                return Err(TopologyError::DuplicateNode(*node_id));
            }
        }

        let mut operations = HashMap::with_capacity(config.operations.len());
        for op in &config.operations {
            if op.request_prefix.is_empty() || op.response_prefix.is_empty() {
                return Err(TopologyError::EmptyPrefix(op.name.clone()));
            }
            if operations.insert(op.name.clone(), op.clone()).is_some() {
                return Err(TopologyError::DuplicateOperation(op.name.clone()));
            }
        }

        Ok(Self {
            node_ids: seen.into_iter().collect(),
            operations,
        })
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn operation(&self, name: &str) -> Result<&OperationConfig> {
        self.operations
            .get(name)
            .ok_or_else(|| TopologyError::UnknownOperation(name.to_string()))
    }

    /// Request channels of an operation, ordered by node id.
    pub fn resolve(&self, operation: &str) -> Result<Vec<NodeChannel>> {
        let op = self.operation(operation)?;
        Ok(self.channels(&op.request_prefix))
    }

    /// Response channels of an operation, ordered by node id.
    pub fn resolve_responses(&self, operation: &str) -> Result<Vec<NodeChannel>> {
        let op = self.operation(operation)?;
        Ok(self.channels(&op.response_prefix))
    }

    /// Every response channel of every operation, ordered by operation name then node id.
    pub fn response_channels(&self) -> Vec<NodeChannel> {
        let mut names: Vec<&String> = self.operations.keys().collect();
        names.sort();
        names
            .into_iter()
            .flat_map(|name| self.channels(&self.operations[name].response_prefix))
            .collect()
    }

    /// Operation names, sorted.
    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every operation's channel pair for one node, ordered by operation name.
    pub fn routes_for(&self, node_id: NodeId) -> Result<Vec<NodeRoute>> {
        if !self.node_ids.contains(&node_id) {
            return Err(TopologyError::UnknownNode(node_id));
        }
        Ok(self
            .operation_names()
            .into_iter()
            .map(|name| {
                let op = &self.operations[&name];
                NodeRoute {
                    request_channel: channel_name(&op.request_prefix, node_id),
                    response_channel: channel_name(&op.response_prefix, node_id),
                    operation: name,
                }
            })
            .collect())
    }

    fn channels(&self, prefix: &str) -> Vec<NodeChannel> {
        self.node_ids
            .iter()
            .map(|&node_id| NodeChannel {
                node_id,
                channel: channel_name(prefix, node_id),
            })
            .collect()
    }
}
