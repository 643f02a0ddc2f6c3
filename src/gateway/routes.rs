//! Route table construction.
//!
//! Runs once, before the server can start. For each channel, in
//! registration order:
//!
//! ```text
//! into_webhook() == None        --> no route (driven some other way, e.g. polling)
//! webhook_enabled() == false    --> no route
//! otherwise                     --> POST {webhook_path()} bound to that channel
//! ```

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use serde_json::json;

use crate::channels::webhook::validate_path;
use crate::channels::{ChannelManager, WebhookChannel};
use crate::config::RouteCollisionPolicy;
use crate::error::GatewayError;
use crate::gateway::dispatch;

/// Liveness route, always registered.
pub const HEALTH_PATH: &str = "/health";

/// One registered webhook route.
#[derive(Clone)]
pub struct WebhookRoute {
    pub channel: String,
    pub path: String,
    pub handler: Arc<dyn WebhookChannel>,
}

impl std::fmt::Debug for WebhookRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookRoute")
            .field("channel", &self.channel)
            .field("path", &self.path)
            .finish()
    }
}

/// Immutable set of webhook routes, unique by path.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<WebhookRoute>,
}

impl RouteTable {
    /// Collect the webhook routes for `channels`.
    pub fn build(
        channels: &ChannelManager,
        policy: RouteCollisionPolicy,
    ) -> Result<Self, GatewayError> {
        let mut routes: Vec<WebhookRoute> = Vec::new();

        for (name, channel) in channels.iter() {
            // Capability check happens here once; requests never repeat it.
            let Some(webhook) = Arc::clone(channel).into_webhook() else {
                tracing::debug!(channel = %name, "Channel has no webhook capability");
                continue;
            };
            if !webhook.webhook_enabled() {
                tracing::debug!(channel = %name, "Webhook disabled for channel");
                continue;
            }

            let path = webhook.webhook_path();
            validate_path(&path).map_err(|reason| GatewayError::InvalidPath {
                channel: name.to_string(),
                path: path.clone(),
                reason,
            })?;
            if path == HEALTH_PATH {
                return Err(GatewayError::InvalidPath {
                    channel: name.to_string(),
                    path,
                    reason: "reserved for the health check".to_string(),
                });
            }

            let route = WebhookRoute {
                channel: name.to_string(),
                path,
                handler: webhook,
            };

            match routes.iter().position(|r| r.path == route.path) {
                None => routes.push(route),
                Some(idx) => {
                    let existing = &routes[idx];
                    match policy {
                        RouteCollisionPolicy::Reject => {
                            return Err(GatewayError::RouteCollision {
                                path: route.path,
                                existing: existing.channel.clone(),
                                incoming: route.channel,
                            });
                        }
                        RouteCollisionPolicy::FirstWins => {
                            tracing::warn!(
                                path = %route.path,
                                kept = %existing.channel,
                                dropped = %route.channel,
                                "Webhook path collision, keeping first registration"
                            );
                        }
                        RouteCollisionPolicy::LastWins => {
                            tracing::warn!(
                                path = %route.path,
                                kept = %route.channel,
                                dropped = %existing.channel,
                                "Webhook path collision, keeping last registration"
                            );
                            routes[idx] = route;
                        }
                    }
                }
            }
        }

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[WebhookRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Channel bound to `path`, if any.
    pub fn channel_for(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.channel.as_str())
    }

    /// Build the axum router: health check plus one POST route per entry.
    ///
    /// Every route gets its own handler state, so a request can only reach
    /// the channel registered at its path.
    pub fn into_router(self) -> Router {
        let mut app = Router::new().route(HEALTH_PATH, get(health));

        for route in self.routes {
            tracing::info!(
                channel = %route.channel,
                path = %route.path,
                "Registered webhook handler"
            );
            let fragment = Router::new()
                .route(&route.path, post(dispatch::handle))
                .with_state(route.handler);
            app = app.merge(fragment);
        }

        app
    }
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "status": "ok" }))
}
