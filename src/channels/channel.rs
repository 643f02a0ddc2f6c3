//! Channel trait and lifecycle state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::bus::OutboundMessage;
use crate::channels::webhook::WebhookChannel;
use crate::error::ChannelError;

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotStarted,
    Running,
    Stopped,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::NotStarted => write!(f, "not started"),
            ChannelState::Running => write!(f, "running"),
            ChannelState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lock-free [`ChannelState`] cell that channel implementations embed.
#[derive(Debug)]
pub struct Lifecycle(AtomicU8);

impl Lifecycle {
    const NOT_STARTED: u8 = 0;
    const RUNNING: u8 = 1;
    const STOPPED: u8 = 2;

    pub fn new() -> Self {
        Self(AtomicU8::new(Self::NOT_STARTED))
    }

    pub fn get(&self) -> ChannelState {
        match self.0.load(Ordering::Acquire) {
            Self::RUNNING => ChannelState::Running,
            Self::STOPPED => ChannelState::Stopped,
            _ => ChannelState::NotStarted,
        }
    }

    pub fn set(&self, state: ChannelState) {
        let raw = match state {
            ChannelState::NotStarted => Self::NOT_STARTED,
            ChannelState::Running => Self::RUNNING,
            ChannelState::Stopped => Self::STOPPED,
        };
        self.0.store(raw, Ordering::Release);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter between the gateway/bus and one external messaging platform.
///
/// Channels are shared as `Arc<dyn Channel>` between the composing process
/// and the gateway, so every method takes `&self`. Any serialization of
/// concurrent calls is up to the implementation.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "telegram", "slack").
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Move to `Running`, performing any platform-side registration.
    ///
    /// Returns `ChannelError::StartupFailed` if registration fails.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Move to `Stopped` and release platform resources.
    ///
    /// Must be safe to call when `start()` never ran or failed.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver a message to the platform.
    ///
    /// Returns `ChannelError::SendFailed` on transport failure.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Capability query: the webhook view of this channel, if it has one.
    ///
    /// Webhook channels override this with `Some(self)`. The gateway calls it
    /// once per channel while building its route table.
    fn into_webhook(self: Arc<Self>) -> Option<Arc<dyn WebhookChannel>> {
        None
    }
}
