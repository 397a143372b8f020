//! Message bus for per-node request and response channels.
//!
//! This module contains:
//! - `MessageBus` trait: publish to a named channel, subscribe handlers to one
//! - `MessageHandler` trait: for processing delivered messages
//! - Bus configuration types
//! - Implementations: Channel (in-process), Mock
//!
//! Delivery is at-least-once: handlers must tolerate redelivery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

#[cfg(feature = "channel")]
pub mod channel;
pub mod mock;

#[cfg(feature = "channel")]
pub use channel::{ChannelBusConfig, ChannelMessageBus};
pub use mock::MockMessageBus;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish to '{channel}' failed: {message}")]
    Publish { channel: String, message: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Bus closed")]
    Closed,

    #[error("Handler on '{channel}' failed: {message}")]
    Handler { channel: String, message: String },

    #[error("Messaging type '{0}' requires a disabled feature")]
    FeatureDisabled(MessagingType),
}

/// A message on a named channel.
///
/// The correlation id travels as message metadata, outside the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub correlation_id: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(channel: impl Into<String>, correlation_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            correlation_id: correlation_id.into(),
            body,
        }
    }
}

/// Handler for processing messages from the bus.
pub trait MessageHandler: Send + Sync {
    /// Process a message.
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, Result<()>>;
}

/// Interface for channel-addressed message delivery.
///
/// Implementations:
/// - `ChannelMessageBus`: tokio broadcast channel, single process
/// - `MockMessageBus`: records publishes, delivers on demand
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message to its channel.
    ///
    /// Success means the bus accepted the message, not that anyone consumed it.
    async fn publish(&self, message: Message) -> Result<()>;

    /// Deliver every message published to `channel` to `handler`.
    ///
    /// Messages on one subscription are handled sequentially. Messages
    /// published after this returns are never missed.
    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process tokio broadcast channel.
    #[default]
    Channel,
}

impl fmt::Display for MessagingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagingType::Channel => write!(f, "channel"),
        }
    }
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Channel-specific configuration.
    pub channel: ChannelSettings,
}

/// Channel bus settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Broadcast buffer size; slow subscribers lag past it.
    pub capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the message bus based on configuration.
///
/// Requires the corresponding feature to be enabled:
/// - Channel: `--features channel` (included in default)
pub fn init_bus(config: &MessagingConfig) -> Result<Arc<dyn MessageBus>> {
    match config.messaging_type {
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                let bus = ChannelMessageBus::new(ChannelBusConfig {
                    capacity: config.channel.capacity,
                });
                info!(messaging_type = "channel", "Message bus initialized");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "channel"))]
            {
                Err(BusError::FeatureDisabled(MessagingType::Channel))
            }
        }
    }
}
