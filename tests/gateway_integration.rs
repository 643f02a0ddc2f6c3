//! End-to-end tests for the webhook gateway.
//!
//! Most tests drive `GatewayServer::router()` in-process with
//! `tower::ServiceExt::oneshot`; the concurrency and drain tests bind a real
//! socket on port 0.
//!
//! Run: `cargo test --test gateway_integration`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tower::ServiceExt;

use hookgate::bus::{MessageBus, OutboundMessage, QueueBus};
use hookgate::channels::{
    Channel, ChannelManager, ChannelState, GenericWebhookChannel, Lifecycle, WebhookChannel,
    WebhookRequest, WebhookResponse, effective_path,
};
use hookgate::config::{ChannelConfig, GatewayConfig, RouteCollisionPolicy};
use hookgate::error::{ChannelError, GatewayError};
use hookgate::gateway::{GatewayServer, GatewayState, RouteTable};

// ============================================================================
// Test doubles
// ============================================================================

/// Webhook channel that records calls and answers with a fixed response.
struct RecordingChannel {
    name: String,
    enabled: bool,
    path: Option<String>,
    response: Value,
    delay: Option<Duration>,
    entered: Notify,
    calls: AtomicUsize,
    bodies: std::sync::Mutex<Vec<Value>>,
    lifecycle: Lifecycle,
}

impl RecordingChannel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            path: None,
            response: json!({ "handled_by": name }),
            delay: None,
            entered: Notify::new(),
            calls: AtomicUsize::new(0),
            bodies: std::sync::Mutex::new(Vec::new()),
            lifecycle: Lifecycle::new(),
        }
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    fn responding(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        self.lifecycle.get()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        self.lifecycle.set(ChannelState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.lifecycle.set(ChannelState::Stopped);
        Ok(())
    }

    async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
        Ok(())
    }

    fn into_webhook(self: Arc<Self>) -> Option<Arc<dyn WebhookChannel>> {
        Some(self)
    }
}

#[async_trait]
impl WebhookChannel for RecordingChannel {
    fn webhook_enabled(&self) -> bool {
        self.enabled
    }

    fn webhook_path(&self) -> String {
        effective_path(&self.name, self.path.as_deref())
    }

    async fn handle_webhook(&self, request: WebhookRequest) -> Result<WebhookResponse, ChannelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(request.body);
        self.entered.notify_one();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.response.clone())
    }
}

/// Channel without the webhook capability (e.g. a polling integration).
struct PollingChannel;

#[async_trait]
impl Channel for PollingChannel {
    fn name(&self) -> &str {
        "polling"
    }

    fn state(&self) -> ChannelState {
        ChannelState::NotStarted
    }

    async fn start(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Webhook channel whose handler always fails.
struct FailingChannel;

#[async_trait]
impl Channel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    fn state(&self) -> ChannelState {
        ChannelState::Running
    }

    async fn start(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
        Ok(())
    }

    fn into_webhook(self: Arc<Self>) -> Option<Arc<dyn WebhookChannel>> {
        Some(self)
    }
}

#[async_trait]
impl WebhookChannel for FailingChannel {
    fn webhook_enabled(&self) -> bool {
        true
    }

    fn webhook_path(&self) -> String {
        effective_path("failing", None)
    }

    async fn handle_webhook(&self, _request: WebhookRequest) -> Result<WebhookResponse, ChannelError> {
        Err(ChannelError::HandlerFailed {
            name: "failing".to_string(),
            reason: "database unavailable".to_string(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn local_config() -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..GatewayConfig::default()
    }
}

fn manager(channels: Vec<Arc<dyn Channel>>) -> ChannelManager {
    let mut manager = ChannelManager::new();
    for channel in channels {
        manager.add(channel);
    }
    manager
}

fn server(channels: Vec<Arc<dyn Channel>>) -> GatewayServer {
    GatewayServer::new(local_config(), &manager(channels)).unwrap()
}

async fn post(server: &GatewayServer, path: &str, body: &str) -> (StatusCode, Value) {
    let response = server
        .router()
        .oneshot(
            Request::post(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn wait_for_addr(server: &GatewayServer) -> std::net::SocketAddr {
    for _ in 0..200 {
        if let Some(addr) = server.local_addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never bound");
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_without_channels() {
    let server = server(vec![]);
    let response = server
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!({"status": "ok"}));
}

#[tokio::test]
async fn health_with_channels() {
    let server = server(vec![
        Arc::new(RecordingChannel::new("telegram")),
        Arc::new(PollingChannel),
    ]);
    let response = server
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"status": "ok"}));
}

// ============================================================================
// Route registration
// ============================================================================

#[tokio::test]
async fn default_route_is_webhook_name() {
    let telegram = Arc::new(RecordingChannel::new("telegram"));
    let channels = manager(vec![telegram.clone()]);

    let table = RouteTable::build(&channels, RouteCollisionPolicy::Reject).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.channel_for("/webhook/telegram"), Some("telegram"));

    let server = GatewayServer::new(local_config(), &channels).unwrap();
    assert_eq!(server.route_count(), 1);

    let (status, _) = post(&server, "/webhook/telegram", "{}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(telegram.calls(), 1);
}

#[tokio::test]
async fn override_route_replaces_name() {
    let slack = Arc::new(RecordingChannel::new("slack").with_path("slack-events"));
    let server = server(vec![slack.clone()]);

    let (status, _) = post(&server, "/webhook/slack-events", "{}").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&server, "/webhook/slack", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(slack.calls(), 1);
}

#[tokio::test]
async fn disabled_channel_has_no_route() {
    let off = Arc::new(RecordingChannel::new("discord").disabled());
    let server = server(vec![off.clone()]);

    assert_eq!(server.route_count(), 0);
    let (status, _) = post(&server, "/webhook/discord", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(off.calls(), 0);
}

#[tokio::test]
async fn non_webhook_channel_has_no_route() {
    let server = server(vec![Arc::new(PollingChannel)]);
    assert_eq!(server.route_count(), 0);
    let (status, _) = post(&server, "/webhook/polling", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unregistered_path_is_not_found() {
    let server = server(vec![Arc::new(RecordingChannel::new("telegram"))]);
    let (status, _) = post(&server, "/webhook/unknown", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn colliding_paths_rejected_at_construction() {
    let channels = manager(vec![
        Arc::new(RecordingChannel::new("a").with_path("shared")),
        Arc::new(RecordingChannel::new("b").with_path("shared")),
    ]);
    let err = GatewayServer::new(local_config(), &channels).err().unwrap();
    assert!(matches!(err, GatewayError::RouteCollision { .. }));
}

#[tokio::test]
async fn colliding_paths_last_wins_when_configured() {
    let a = Arc::new(RecordingChannel::new("a").with_path("shared"));
    let b = Arc::new(RecordingChannel::new("b").with_path("shared"));
    let config = GatewayConfig {
        route_collision: RouteCollisionPolicy::LastWins,
        ..local_config()
    };
    let server = GatewayServer::new(config, &manager(vec![a.clone(), b.clone()])).unwrap();

    let (status, body) = post(&server, "/webhook/shared", "{}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"handled_by": "b"}));
    assert_eq!(a.calls(), 0);
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn each_route_dispatches_to_its_own_channel() {
    let a = Arc::new(RecordingChannel::new("alpha"));
    let b = Arc::new(RecordingChannel::new("beta"));
    let c = Arc::new(RecordingChannel::new("gamma"));
    let server = server(vec![a.clone(), b.clone(), c.clone()]);

    let (_, body) = post(&server, "/webhook/alpha", r#"{"n": 1}"#).await;
    assert_eq!(body, json!({"handled_by": "alpha"}));

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
    assert_eq!(c.calls(), 0);

    let (_, body) = post(&server, "/webhook/beta", r#"{"n": 2}"#).await;
    assert_eq!(body, json!({"handled_by": "beta"}));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);
    assert_eq!(b.bodies.lock().unwrap()[0], json!({"n": 2}));
}

#[tokio::test]
async fn handler_response_is_returned_verbatim() {
    let echo = Arc::new(RecordingChannel::new("echo").responding(json!({"echo": 42})));
    let server = server(vec![echo]);

    let response = server
        .router()
        .oneshot(
            Request::post("/webhook/echo")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], br#"{"echo":42}"#);
}

#[tokio::test]
async fn malformed_json_is_client_error_and_skips_channel() {
    let telegram = Arc::new(RecordingChannel::new("telegram"));
    let server = server(vec![telegram.clone()]);

    let (status, body) = post(&server, "/webhook/telegram", "{this is not json").await;
    assert!(status.is_client_error());
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("malformed"));
    assert_eq!(telegram.calls(), 0);
}

#[tokio::test]
async fn json_without_content_type_is_accepted() {
    let telegram = Arc::new(RecordingChannel::new("telegram"));
    let server = server(vec![telegram.clone()]);

    let response = server
        .router()
        .oneshot(
            Request::post("/webhook/telegram")
                .body(Body::from(r#"{"update_id": 1}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(telegram.calls(), 1);
}

#[tokio::test]
async fn handler_failure_is_server_error() {
    let server = server(vec![Arc::new(FailingChannel)]);
    let (status, body) = post(&server, "/webhook/failing", "{}").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "internal server error"}));
}

#[tokio::test]
async fn get_on_webhook_route_is_rejected() {
    let telegram = Arc::new(RecordingChannel::new("telegram"));
    let server = server(vec![telegram.clone()]);

    let response = server
        .router()
        .oneshot(Request::get("/webhook/telegram").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(telegram.calls(), 0);
}

// ============================================================================
// Generic channel through the gateway
// ============================================================================

#[tokio::test]
async fn generic_channel_publishes_to_bus() {
    let bus = Arc::new(QueueBus::new(8));
    let mut config = ChannelConfig::new("generic");
    config.webhook_path = Some("hooks/generic".to_string());
    let channels = ChannelManager::from_config(&[config], bus.clone() as Arc<dyn MessageBus>);
    assert!(channels.start_all().await.is_empty());
    let server = GatewayServer::new(local_config(), &channels).unwrap();

    let (status, body) = post(
        &server,
        "/webhook/hooks/generic",
        r#"{"sender": "u1", "chat_id": "c1", "text": "hello gateway"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "accepted": 1}));

    let msg = bus.consume_inbound().await.unwrap();
    assert_eq!(msg.channel, "generic");
    assert_eq!(msg.content, "hello gateway");
}

#[tokio::test]
async fn generic_channel_bad_signature_is_error_shaped_ok() {
    let bus: Arc<dyn MessageBus> = Arc::new(QueueBus::new(8));
    let mut config = ChannelConfig::new("signed");
    config.secret = Some(secrecy::SecretString::from("k"));
    let channel = Arc::new(GenericWebhookChannel::new(config, bus));
    channel.start().await.unwrap();
    let server = server(vec![channel]);

    let (status, body) = post(&server, "/webhook/signed", r#"{"text": "x"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": false, "error": "invalid signature"}));
}

// ============================================================================
// Real socket: concurrency and drain
// ============================================================================

#[tokio::test]
async fn concurrent_posts_are_isolated() {
    let a = Arc::new(RecordingChannel::new("a").slow(Duration::from_millis(100)));
    let b = Arc::new(RecordingChannel::new("b").slow(Duration::from_millis(100)));
    let server = Arc::new(server(vec![a.clone(), b.clone()]));
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.start_async().await }
    });
    let addr = wait_for_addr(&server).await;

    let client = reqwest::Client::new();
    let mut tasks = Vec::new();
    for i in 0..10 {
        let target = if i % 2 == 0 { "a" } else { "b" };
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let body: Value = client
                .post(format!("http://{addr}/webhook/{target}"))
                .json(&json!({ "i": i }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            (target, body)
        }));
    }

    let started = std::time::Instant::now();
    for task in tasks {
        let (target, body) = task.await.unwrap();
        assert_eq!(body, json!({ "handled_by": target }));
    }
    // Ten 100ms handlers finishing well under a second means they overlapped.
    assert!(started.elapsed() < Duration::from_millis(900));

    assert_eq!(a.calls(), 5);
    assert_eq!(b.calls(), 5);
    assert!(a.bodies.lock().unwrap().iter().all(|b| b["i"].as_i64().unwrap() % 2 == 0));
    assert!(b.bodies.lock().unwrap().iter().all(|b| b["i"].as_i64().unwrap() % 2 == 1));

    server.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_drains_in_flight_requests() {
    let slow = Arc::new(RecordingChannel::new("slow").slow(Duration::from_millis(300)));
    let server = Arc::new(server(vec![slow.clone()]));
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.start_async().await }
    });
    let addr = wait_for_addr(&server).await;

    let request = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{addr}/webhook/slow"))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .status()
    });

    slow.entered.notified().await;
    server.stop();

    // The in-flight request still completes normally.
    assert_eq!(request.await.unwrap(), reqwest::StatusCode::OK);
    handle.await.unwrap().unwrap();
    assert_eq!(server.state(), GatewayState::Stopped);
}

#[tokio::test]
async fn drain_timeout_bounds_shutdown() {
    let slow = Arc::new(RecordingChannel::new("stuck").slow(Duration::from_secs(30)));
    let config = GatewayConfig {
        drain_timeout_secs: Some(0),
        ..local_config()
    };
    let server = Arc::new(GatewayServer::new(config, &manager(vec![slow.clone()])).unwrap());
    let handle = tokio::spawn({
        let server = server.clone();
        async move { server.start_async().await }
    });
    let addr = wait_for_addr(&server).await;

    tokio::spawn(async move {
        let _ = reqwest::Client::new()
            .post(format!("http://{addr}/webhook/stuck"))
            .json(&json!({}))
            .send()
            .await;
    });

    slow.entered.notified().await;
    server.stop();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("start_async should return once the drain timeout elapses");
    result.unwrap().unwrap();
    assert_eq!(server.state(), GatewayState::Stopped);
}
