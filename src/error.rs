//! Error types for hookgate.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Top-level error type for the gateway process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel-related errors.
///
/// `StartupFailed` and `SendFailed` come out of a channel's own lifecycle and
/// delivery operations and are handed back to whoever invoked them. Nothing in
/// this crate retries them. `AuthFailed` stays inside the channel: webhook
/// handlers turn it into an error-shaped acknowledgment.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} failed to handle webhook: {reason}")]
    HandlerFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel not found: {0}")]
    NotFound(String),
}

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Serve(String),

    #[error("Webhook path {path} claimed by both {existing} and {incoming}")]
    RouteCollision {
        path: String,
        existing: String,
        incoming: String,
    },

    #[error("Invalid webhook path {path:?} for channel {channel}: {reason}")]
    InvalidPath {
        channel: String,
        path: String,
        reason: String,
    },

    #[error("Gateway is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Per-request failures produced by the dispatch bridge.
///
/// Each variant maps to an HTTP status; the failure never leaves the request
/// task that produced it.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed JSON payload: {0}")]
    MalformedPayload(String),

    #[error("Webhook handler failed: {0}")]
    Handler(#[from] ChannelError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            DispatchError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Handler internals stay in the logs, callers only see a generic message.
        let message = match &self {
            DispatchError::MalformedPayload(reason) => format!("malformed JSON payload: {reason}"),
            DispatchError::Handler(_) => "internal server error".to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Message bus {0} queue is closed")]
    Closed(&'static str),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
