//! Webhook capability for channels reachable through inbound HTTP callbacks.
//!
//! A webhook channel is served at its *effective path*:
//!
//! ```text
//! webhook_path unset / ""   -->  /webhook/{name}
//! webhook_path = "tg/bot"   -->  /webhook/tg/bot
//! ```

use async_trait::async_trait;
use axum::http::HeaderMap;
use bytes::Bytes;

use crate::channels::channel::Channel;
use crate::config::ChannelConfig;
use crate::error::ChannelError;

/// Prefix every webhook route lives under.
pub const WEBHOOK_PREFIX: &str = "/webhook";

/// Response body a channel returns to the platform. Passed through verbatim.
pub type WebhookResponse = serde_json::Value;

/// One inbound webhook delivery, as handed to a channel.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Case-insensitive, multi-valued header map.
    pub headers: HeaderMap,
    /// Decoded JSON body.
    pub body: serde_json::Value,
    /// Exact request bytes, for signature verification.
    pub raw_body: Bytes,
}

impl WebhookRequest {
    pub fn new(headers: HeaderMap, body: serde_json::Value, raw_body: Bytes) -> Self {
        Self {
            headers,
            body,
            raw_body,
        }
    }

    /// Build a request from a JSON value, serializing it for `raw_body`.
    pub fn from_json(headers: HeaderMap, body: serde_json::Value) -> Self {
        let raw_body = Bytes::from(body.to_string());
        Self::new(headers, body, raw_body)
    }

    /// First value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Webhook settings a channel reads from its configuration at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub path: Option<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl From<&ChannelConfig> for WebhookSettings {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            enabled: config.webhook_enabled,
            path: config.webhook_path.clone(),
        }
    }
}

impl WebhookSettings {
    /// Route this channel is served at.
    pub fn effective_path(&self, name: &str) -> String {
        effective_path(name, self.path.as_deref())
    }
}

/// Compute `/webhook/{override}` or `/webhook/{name}`.
///
/// Surrounding slashes on the override are trimmed; an override that is
/// empty after trimming counts as unset.
pub fn effective_path(name: &str, path_override: Option<&str>) -> String {
    let segment = path_override
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .unwrap_or(name);
    format!("{WEBHOOK_PREFIX}/{segment}")
}

/// Check that a path can be registered as a literal route.
///
/// Rejects empty segments and router syntax (`{param}`, `*wildcard`, `:param`).
pub fn validate_path(path: &str) -> Result<(), String> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err("path must start with '/'".to_string());
    };
    for segment in rest.split('/') {
        if segment.is_empty() {
            return Err("path contains an empty segment".to_string());
        }
        if segment.contains(['{', '}', '*']) {
            return Err(format!("segment {segment:?} contains route syntax"));
        }
        if segment.starts_with(':') {
            return Err(format!("segment {segment:?} must not start with ':'"));
        }
        if segment.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(format!("segment {segment:?} contains whitespace"));
        }
    }
    Ok(())
}

/// A channel that receives events through inbound webhooks.
#[async_trait]
pub trait WebhookChannel: Channel {
    /// Whether the gateway should register a route for this channel.
    /// Read once when the route table is built.
    fn webhook_enabled(&self) -> bool;

    /// Effective route, see [`effective_path`].
    fn webhook_path(&self) -> String;

    /// Handle one webhook delivery.
    ///
    /// Implementations verify the request, publish any messages it carries
    /// to the bus and return the acknowledgment the platform expects.
    /// Verification failures should come back as an error-shaped
    /// `Ok` response; `Err` is reserved for internal failures and becomes a
    /// 500.
    async fn handle_webhook(&self, request: WebhookRequest)
    -> Result<WebhookResponse, ChannelError>;
}
