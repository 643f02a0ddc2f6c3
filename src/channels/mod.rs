//! Channel adapters.
//!
//! A channel connects the bus to one external messaging platform. Channels
//! that receive events over HTTP also implement [`WebhookChannel`]; the
//! gateway discovers that capability through [`Channel::into_webhook`].
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────────────── ChannelManager ───────────────────────┐
//!             │  (name, Arc<dyn Channel>) in registration order               │
//!             └───────┬───────────────────────────────┬───────────────────────┘
//!                     │ into_webhook() at startup     │ dispatch_outbound()
//!                     ▼                               ▼
//!  POST /webhook/x ─► GatewayServer ─► handle_webhook ─► MessageBus ─► ... ─► Channel::send
//! ```

mod channel;
pub mod generic;
mod manager;
pub mod webhook;

pub use channel::{Channel, ChannelState, Lifecycle};
pub use generic::GenericWebhookChannel;
pub use manager::ChannelManager;
pub use webhook::{
    WEBHOOK_PREFIX, WebhookChannel, WebhookRequest, WebhookResponse, WebhookSettings,
    effective_path,
};
