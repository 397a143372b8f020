//! Wire envelopes exchanged with control-component nodes.
//!
//! Bodies are JSON; payload bytes are base64 encoded. The correlation id is
//! carried by the transport, never by the body.

use serde::{Deserialize, Serialize};

use crate::ledger::{CommandKey, NodeId};

/// Result type for envelope encoding.
pub type Result<T> = std::result::Result<T, EnvelopeError>;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Request sent to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    pub context_id: String,
    pub context: String,
    pub node_id: NodeId,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Response returned by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    pub context_id: String,
    pub context: String,
    pub node_id: NodeId,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl NodeRequest {
    pub fn new(key: &CommandKey, payload: Vec<u8>) -> Self {
        Self {
            context_id: key.context_id.clone(),
            context: key.context.clone(),
            node_id: key.node_id,
            payload,
        }
    }

    pub fn key(&self) -> CommandKey {
        CommandKey::new(&self.context_id, &self.context, self.node_id)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(EnvelopeError::Decode)
    }
}

impl NodeResponse {
    pub fn new(key: &CommandKey, payload: Vec<u8>) -> Self {
        Self {
            context_id: key.context_id.clone(),
            context: key.context.clone(),
            node_id: key.node_id,
            payload,
        }
    }

    pub fn key(&self) -> CommandKey {
        CommandKey::new(&self.context_id, &self.context, self.node_id)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(EnvelopeError::Decode)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
