//! hookgate - webhook gateway for messaging-platform channels.
//!
//! Inbound platform callbacks arrive at `POST /webhook/{path}`, are routed to
//! the [`channels::WebhookChannel`] registered at that path, and come out the
//! other side as normalized [`bus::InboundMessage`]s on the [`bus::MessageBus`].
//!
//! ```text
//! platform ──POST /webhook/support──► GatewayServer ──► GenericWebhookChannel::handle_webhook
//!                                                              │
//!                                                              ▼
//!                                                         MessageBus
//! ```

pub mod bus;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use gateway::GatewayServer;
