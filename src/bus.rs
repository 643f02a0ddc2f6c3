//! Message bus between channels and the rest of the system.
//!
//! ```text
//! webhook --> Channel::handle_webhook --> publish_inbound  --> consumer (agent, router, ...)
//! producer --> publish_outbound --> ChannelManager::dispatch_outbound --> Channel::send
//! ```
//!
//! The gateway only depends on the [`MessageBus`] trait. [`QueueBus`] is the
//! in-process implementation backed by bounded tokio queues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::error::BusError;

/// Normalized message a channel publishes after parsing a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    /// Name of the channel that received it.
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    /// Raw platform payload for consumers that need more than the text.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Message to be delivered to a platform through [`Channel::send`](crate::channels::Channel::send).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Name of the channel that should deliver it.
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Publishing side of the bus, shared by every channel.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_inbound(&self, msg: InboundMessage) -> Result<(), BusError>;

    async fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), BusError>;
}

/// In-process bus made of two bounded queues.
///
/// Publishing waits when a queue is full, which applies backpressure to the
/// webhook request that produced the message.
pub struct QueueBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
}

impl QueueBus {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    /// Wait for the next inbound message. `None` once every sender is gone.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Hand the outbound queue to its single consumer, normally
    /// [`ChannelManager::dispatch_outbound`](crate::channels::ChannelManager::dispatch_outbound).
    /// Returns `None` if it was already taken.
    pub async fn take_outbound_receiver(&self) -> Option<mpsc::Receiver<OutboundMessage>> {
        self.outbound_rx.lock().await.take()
    }
}

impl Default for QueueBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for QueueBus {
    async fn publish_inbound(&self, msg: InboundMessage) -> Result<(), BusError> {
        tracing::debug!(channel = %msg.channel, id = %msg.id, "Publishing inbound message");
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::Closed("inbound"))
    }

    async fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), BusError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::Closed("outbound"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inbound_roundtrip_preserves_order() {
        let bus = QueueBus::new(8);
        bus.publish_inbound(InboundMessage::new("tg", "u1", "c1", "first"))
            .await
            .unwrap();
        bus.publish_inbound(InboundMessage::new("tg", "u1", "c1", "second"))
            .await
            .unwrap();

        assert_eq!(bus.consume_inbound().await.unwrap().content, "first");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn outbound_receiver_can_only_be_taken_once() {
        let bus = QueueBus::default();
        let mut rx = bus.take_outbound_receiver().await.unwrap();
        assert!(bus.take_outbound_receiver().await.is_none());

        bus.publish_outbound(OutboundMessage::new("tg", "c1", "hi"))
            .await
            .unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "tg");
        assert_eq!(msg.content, "hi");
    }

    #[tokio::test]
    async fn publish_outbound_fails_once_receiver_dropped() {
        let bus = QueueBus::default();
        drop(bus.take_outbound_receiver().await);
        let err = bus
            .publish_outbound(OutboundMessage::new("tg", "c1", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed("outbound")));
    }

    #[test]
    fn inbound_message_serializes_with_metadata() {
        let msg = InboundMessage::new("slack", "U1", "C1", "hello")
            .with_metadata(serde_json::json!({"ts": "1"}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["channel"], "slack");
        assert_eq!(json["metadata"]["ts"], "1");
    }
}
