//! Ordered registry of channels owned by the composing process.
//!
//! The gateway gets a read-only view of the same `Arc`s through
//! [`ChannelManager::iter`]; it never adds or removes channels.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;

use crate::bus::{MessageBus, OutboundMessage};
use crate::channels::channel::Channel;
use crate::channels::generic::GenericWebhookChannel;
use crate::config::{ChannelConfig, ChannelKind};
use crate::error::ChannelError;

/// Channels in registration order, keyed by unique name.
#[derive(Default, Clone)]
pub struct ChannelManager {
    channels: Vec<(String, Arc<dyn Channel>)>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the channels described by `configs`, in order.
    pub fn from_config(configs: &[ChannelConfig], bus: Arc<dyn MessageBus>) -> Self {
        let mut manager = Self::new();
        for config in configs {
            let channel: Arc<dyn Channel> = match config.kind {
                ChannelKind::Generic => {
                    Arc::new(GenericWebhookChannel::new(config.clone(), bus.clone()))
                }
            };
            manager.add(channel);
        }
        manager
    }

    /// Register a channel under its own name.
    ///
    /// Re-registering a name replaces the earlier channel in place, keeping
    /// its position.
    pub fn add(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        self.insert(name, channel);
    }

    /// Register a channel under an explicit name.
    pub fn insert(&mut self, name: impl Into<String>, channel: Arc<dyn Channel>) {
        let name = name.into();
        match self.channels.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => {
                tracing::warn!(channel = %name, "Replacing previously registered channel");
                slot.1 = channel;
            }
            None => self.channels.push((name, channel)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// `(name, channel)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Channel>)> {
        self.channels.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel in registration order.
    ///
    /// A failing channel does not prevent the others from starting. Failures
    /// are returned to the caller and are not retried.
    pub async fn start_all(&self) -> Vec<ChannelError> {
        let mut failures = Vec::new();
        for (name, channel) in &self.channels {
            match channel.start().await {
                Ok(()) => tracing::info!(channel = %name, "Channel started"),
                Err(e) => {
                    tracing::error!(channel = %name, error = %e, "Channel failed to start");
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// Stop every channel concurrently, whatever its state.
    pub async fn stop_all(&self) {
        let results = join_all(self.channels.iter().map(|(_, c)| c.stop())).await;
        for ((name, _), result) in self.channels.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(channel = %name, error = %e, "Channel failed to stop cleanly");
            }
        }
    }

    /// Deliver one outbound message to the channel it names.
    pub async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let channel = self
            .get(&msg.channel)
            .ok_or_else(|| ChannelError::NotFound(msg.channel.clone()))?;
        channel.send(msg).await
    }

    /// Drain the outbound queue until it closes, routing each message to
    /// its channel. Failures are logged and the message is dropped.
    pub async fn dispatch_outbound(&self, mut rx: mpsc::Receiver<OutboundMessage>) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.send(&msg).await {
                tracing::warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    error = %e,
                    "Outbound delivery failed"
                );
            }
        }
        tracing::debug!("Outbound queue closed");
    }
}
