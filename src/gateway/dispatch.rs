//! Dispatch bridge between an HTTP request and a channel's webhook handler.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;

use crate::channels::{WebhookChannel, WebhookRequest, WebhookResponse};
use crate::error::DispatchError;

/// Decode the body, call the bound channel, return its response as-is.
///
/// Malformed JSON is answered with 400 without touching the channel. A
/// handler error becomes a 500. There are no retries.
pub async fn handle(
    State(channel): State<Arc<dyn WebhookChannel>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, DispatchError> {
    let json: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(channel = %channel.name(), error = %e, "Rejected malformed webhook payload");
        DispatchError::MalformedPayload(e.to_string())
    })?;

    let request = WebhookRequest::new(headers, json, body);
    match channel.handle_webhook(request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            tracing::error!(channel = %channel.name(), error = %e, "Webhook handler failed");
            Err(DispatchError::Handler(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundMessage;
    use crate::channels::{Channel, ChannelState};
    use crate::error::ChannelError;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Channel for Echo {
        fn name(&self) -> &str {
            "echo"
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
    }

    #[async_trait]
    impl WebhookChannel for Echo {
        fn webhook_enabled(&self) -> bool {
            true
        }
        fn webhook_path(&self) -> String {
            "/webhook/echo".to_string()
        }
        async fn handle_webhook(
            &self,
            request: WebhookRequest,
        ) -> Result<WebhookResponse, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChannelError::HandlerFailed {
                    name: "echo".to_string(),
                    reason: "boom".to_string(),
                });
            }
            Ok(serde_json::json!({
                "body": request.body,
                "token": request.header("x-token"),
            }))
        }
    }

    fn echo(fail: bool) -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn passes_headers_and_body_through() {
        let channel = echo(false);
        let mut headers = HeaderMap::new();
        headers.insert("X-Token", "t1".parse().unwrap());

        let Json(response) = handle(
            State(channel.clone() as Arc<dyn WebhookChannel>),
            headers,
            Bytes::from_static(br#"{"a": [1, 2]}"#),
        )
        .await
        .unwrap();

        assert_eq!(response["body"]["a"][1], 2);
        assert_eq!(response["token"], "t1");
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_json_never_reaches_channel() {
        let channel = echo(false);
        let err = handle(
            State(channel.clone() as Arc<dyn WebhookChannel>),
            HeaderMap::new(),
            Bytes::from_static(b"{not json"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DispatchError::MalformedPayload(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_is_server_error() {
        let channel = echo(true);
        let err = handle(
            State(channel.clone() as Arc<dyn WebhookChannel>),
            HeaderMap::new(),
            Bytes::from_static(b"{}"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }
}
