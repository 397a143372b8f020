//! Mock message bus implementation for testing.
//!
//! Publishes are recorded rather than delivered. Tests drive delivery
//! explicitly with `deliver`, which runs every handler subscribed to the
//! message's channel inline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Message, MessageBus, MessageHandler, Result};

/// Mock message bus for testing.
#[derive(Default)]
pub struct MockMessageBus {
    published: RwLock<Vec<Message>>,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
    fail_on_publish: RwLock<bool>,
}

impl MockMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Every message published so far, in publish order.
    pub async fn published(&self) -> Vec<Message> {
        self.published.read().await.clone()
    }

    /// Messages published to `channel`, in publish order.
    pub async fn published_to(&self, channel: &str) -> Vec<Message> {
        self.published
            .read()
            .await
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    pub async fn take_published(&self) -> Vec<Message> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Run every handler subscribed to the message's channel.
    ///
    /// Returns the number of handlers invoked.
    pub async fn deliver(&self, message: Message) -> Result<usize> {
        let handlers = self
            .handlers
            .read()
            .await
            .get(&message.channel)
            .cloned()
            .unwrap_or_default();

        let message = Arc::new(message);
        for handler in &handlers {
            handler.handle(message.clone()).await?;
        }
        Ok(handlers.len())
    }
}

#[async_trait]
impl MessageBus for MockMessageBus {
    async fn publish(&self, message: Message) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish {
                channel: message.channel,
                message: "Mock publish failure".to_string(),
            });
        }
        self.published.write().await.push(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.handlers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}
