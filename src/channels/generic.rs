//! Configurable JSON webhook channel.
//!
//! Works with any platform that POSTs JSON and accepts JSON back:
//!
//! - `{"challenge": X}` (or `"type": "url_verification"`) is echoed as `{"challenge": X}`.
//! - With a `secret`, the `sha256=<hex>` HMAC in `signature_header` must match the raw body.
//! - The body is either one message or `{"messages": [...]}`; each message with
//!   non-empty text at `content_pointer` is published to the bus.
//! - Outbound messages are POSTed as JSON to `outbound_url`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::channels::channel::{Channel, ChannelState, Lifecycle};
use crate::channels::webhook::{WebhookChannel, WebhookRequest, WebhookResponse, WebhookSettings};
use crate::config::ChannelConfig;
use crate::error::ChannelError;

type HmacSha256 = Hmac<Sha256>;

pub struct GenericWebhookChannel {
    config: ChannelConfig,
    webhook: WebhookSettings,
    bus: Arc<dyn MessageBus>,
    client: reqwest::Client,
    lifecycle: Lifecycle,
    registered: AtomicBool,
}

impl GenericWebhookChannel {
    pub fn new(config: ChannelConfig, bus: Arc<dyn MessageBus>) -> Self {
        let webhook = WebhookSettings::from(&config);
        Self {
            config,
            webhook,
            bus,
            client: reqwest::Client::new(),
            lifecycle: Lifecycle::new(),
            registered: AtomicBool::new(false),
        }
    }

    /// Check the `sha256=<hex>` signature header against the raw body.
    fn verify_signature(
        &self,
        secret: &SecretString,
        request: &WebhookRequest,
    ) -> Result<(), ChannelError> {
        let auth_failed = |reason: &str| ChannelError::AuthFailed {
            name: self.config.name.clone(),
            reason: reason.to_string(),
        };

        let header = request
            .header(&self.config.signature_header)
            .ok_or_else(|| auth_failed("missing signature header"))?;
        let expected = header
            .strip_prefix("sha256=")
            .ok_or_else(|| auth_failed("signature is not sha256=<hex>"))?;
        let expected = hex::decode(expected).map_err(|_| auth_failed("signature is not valid hex"))?;

        let computed = mac(secret, &request.raw_body);
        if bool::from(computed.as_slice().ct_eq(expected.as_slice())) {
            Ok(())
        } else {
            Err(auth_failed("signature mismatch"))
        }
    }

    /// Turn one platform message into an inbound bus message.
    /// Returns `None` when there is no text to forward.
    fn normalize(&self, item: &Value) -> Option<InboundMessage> {
        let content = item
            .pointer(&self.config.content_pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())?;

        let sender = pointer_string(item, &self.config.sender_pointer)
            .unwrap_or_else(|| "unknown".to_string());
        let chat = pointer_string(item, &self.config.chat_pointer).unwrap_or_else(|| sender.clone());

        Some(
            InboundMessage::new(&self.config.name, sender, chat, content)
                .with_metadata(item.clone()),
        )
    }

    fn registration_target(&self) -> Result<Option<(String, String)>, ChannelError> {
        let Some(registration_url) = self.config.registration_url.clone() else {
            return Ok(None);
        };
        let Some(public_url) = self.config.public_url.as_deref() else {
            return Err(ChannelError::StartupFailed {
                name: self.config.name.clone(),
                reason: "registration_url is set but public_url is not".to_string(),
            });
        };
        let callback = format!("{}{}", public_url.trim_end_matches('/'), self.webhook_path());
        Ok(Some((registration_url, callback)))
    }
}

/// `hex(HMAC-SHA256(secret, body))`, lowercase.
pub fn sign(secret: &SecretString, body: &[u8]) -> String {
    hex::encode(mac(secret, body))
}

fn mac(secret: &SecretString, body: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC key can be any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn pointer_string(item: &Value, pointer: &str) -> Option<String> {
    match item.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn challenge(body: &Value) -> Option<&Value> {
    let challenge = body.get("challenge")?;
    let is_verification = body.get("type").and_then(Value::as_str) == Some("url_verification");
    (is_verification || body.as_object().is_some_and(|o| o.len() == 1)).then_some(challenge)
}

#[async_trait]
impl Channel for GenericWebhookChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn state(&self) -> ChannelState {
        self.lifecycle.get()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        if self.lifecycle.get() == ChannelState::Running {
            return Ok(());
        }

        if let Some((registration_url, callback)) = self.registration_target()? {
            let response = self
                .client
                .post(&registration_url)
                .json(&json!({ "url": callback }))
                .send()
                .await
                .map_err(|e| ChannelError::StartupFailed {
                    name: self.config.name.clone(),
                    reason: format!("webhook registration request failed: {e}"),
                })?;
            if !response.status().is_success() {
                return Err(ChannelError::StartupFailed {
                    name: self.config.name.clone(),
                    reason: format!("webhook registration returned {}", response.status()),
                });
            }
            self.registered.store(true, Ordering::Release);
            tracing::info!(channel = %self.config.name, url = %callback, "Registered webhook");
        }

        self.lifecycle.set(ChannelState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if self.registered.swap(false, Ordering::AcqRel)
            && let Some(registration_url) = self.config.registration_url.as_deref()
        {
            match self.client.delete(registration_url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(channel = %self.config.name, "Deregistered webhook");
                }
                Ok(response) => {
                    tracing::warn!(
                        channel = %self.config.name,
                        status = %response.status(),
                        "Webhook deregistration rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(channel = %self.config.name, error = %e, "Webhook deregistration failed");
                }
            }
        }
        self.lifecycle.set(ChannelState::Stopped);
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let send_failed = |reason: String| ChannelError::SendFailed {
            name: self.config.name.clone(),
            reason,
        };

        if self.lifecycle.get() != ChannelState::Running {
            return Err(send_failed(format!(
                "channel is {}",
                self.lifecycle.get()
            )));
        }
        let Some(url) = self.config.outbound_url.as_deref() else {
            return Err(send_failed("no outbound_url configured".to_string()));
        };

        let response = self
            .client
            .post(url)
            .json(msg)
            .send()
            .await
            .map_err(|e| send_failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(send_failed(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    fn into_webhook(self: Arc<Self>) -> Option<Arc<dyn WebhookChannel>> {
        Some(self)
    }
}

#[async_trait]
impl WebhookChannel for GenericWebhookChannel {
    fn webhook_enabled(&self) -> bool {
        self.webhook.enabled
    }

    fn webhook_path(&self) -> String {
        self.webhook.effective_path(&self.config.name)
    }

    async fn handle_webhook(
        &self,
        request: WebhookRequest,
    ) -> Result<WebhookResponse, ChannelError> {
        if let Some(secret) = &self.config.secret
            && let Err(e) = self.verify_signature(secret, &request)
        {
            tracing::warn!(channel = %self.config.name, error = %e, "Rejected webhook");
            return Ok(json!({ "ok": false, "error": "invalid signature" }));
        }

        if let Some(challenge) = challenge(&request.body) {
            return Ok(json!({ "challenge": challenge }));
        }

        if self.lifecycle.get() != ChannelState::Running {
            tracing::debug!(channel = %self.config.name, "Dropping webhook, channel not running");
            return Ok(json!({ "ok": false, "error": "channel not running" }));
        }

        let items: Vec<&Value> = match request.body.get("messages").and_then(Value::as_array) {
            Some(messages) => messages.iter().collect(),
            None => vec![&request.body],
        };

        let mut accepted = 0usize;
        for item in items {
            let Some(msg) = self.normalize(item) else {
                continue;
            };
            self.bus
                .publish_inbound(msg)
                .await
                .map_err(|e| ChannelError::HandlerFailed {
                    name: self.config.name.clone(),
                    reason: e.to_string(),
                })?;
            accepted += 1;
        }

        tracing::debug!(channel = %self.config.name, accepted, "Processed webhook");
        Ok(json!({ "ok": true, "accepted": accepted }))
    }
}
