//! In-memory channel-based message bus for standalone mode.
//!
//! Uses one tokio broadcast channel for every named channel within a single
//! process. Channel filtering is done on the subscriber side.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{Message, MessageBus, MessageHandler, Result};

/// Configuration for channel message bus.
#[derive(Clone, Debug)]
pub struct ChannelBusConfig {
    /// Broadcast buffer size.
    pub capacity: usize,
}

impl Default for ChannelBusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// In-memory message bus using a tokio broadcast channel.
///
/// Every subscription owns a receiver and a consumer task that forwards the
/// messages of its channel to its handler, one at a time.
pub struct ChannelMessageBus {
    /// Broadcast sender for publishing messages.
    sender: broadcast::Sender<Arc<Message>>,
}

impl ChannelMessageBus {
    /// Create a new channel message bus.
    pub fn new(config: ChannelBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity.max(1));

        info!(capacity = config.capacity, "Channel message bus initialized");

        Self { sender }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelMessageBus {
    fn default() -> Self {
        Self::new(ChannelBusConfig::default())
    }
}

#[async_trait]
impl MessageBus for ChannelMessageBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %message.channel))]
    async fn publish(&self, message: Message) -> Result<()> {
        let channel = message.channel.clone();

        // Send to channel (ignore error if no receivers)
        match self.sender.send(Arc::new(message)) {
            Ok(receiver_count) => {
                debug!(
                    channel = %channel,
                    receivers = receiver_count,
                    "Published message to channel"
                );
            }
            Err(_) => {
                debug!(channel = %channel, "Published message (no receivers)");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        // Receiver is created before returning so later publishes are seen.
        let mut receiver = self.sender.subscribe();
        let channel = channel.to_string();
        let filter = channel.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if message.channel != filter {
                            continue;
                        }

                        debug!(
                            channel = %filter,
                            correlation_id = %message.correlation_id,
                            "Received message via channel"
                        );

                        if let Err(e) = handler.handle(message).await {
                            warn!(channel = %filter, error = %e, "Handler failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(channel = %filter, skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(channel = %filter, "Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        info!(channel = %channel, "Handler subscribed to channel bus");

        Ok(())
    }
}

#[cfg(test)]
mod tests;
