//! Gateway HTTP server.
//!
//! ```text
//! new()          --> router built, nothing bound               (Unstarted)
//! bind()         --> optional, hold the port ahead of serving  (Unstarted)
//! start_async()  --> bind if needed, serve until stop()        (Serving)
//! stop()         --> stop accepting, drain in-flight requests  (Stopped)
//! ```
//!
//! `start_async()` resolves only once the server has fully stopped, so the
//! task awaiting it is the one that observes drain completion.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::channels::ChannelManager;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::routes::RouteTable;

/// Lifecycle state of the gateway server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Unstarted,
    Serving,
    Stopped,
}

impl GatewayState {
    const UNSTARTED: u8 = 0;
    const SERVING: u8 = 1;
    const STOPPED: u8 = 2;

    fn from_raw(raw: u8) -> Self {
        match raw {
            Self::SERVING => GatewayState::Serving,
            Self::STOPPED => GatewayState::Stopped,
            _ => GatewayState::Unstarted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Unstarted => "unstarted",
            GatewayState::Serving => "serving",
            GatewayState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP front door for webhook channels.
pub struct GatewayServer {
    config: GatewayConfig,
    router: Router,
    route_count: usize,
    state: AtomicU8,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
}

impl GatewayServer {
    /// Build the router for `channels`. No I/O happens here.
    ///
    /// Fails if a webhook path is invalid, or if two channels claim the same
    /// path under [`RouteCollisionPolicy::Reject`](crate::config::RouteCollisionPolicy::Reject).
    pub fn new(config: GatewayConfig, channels: &ChannelManager) -> Result<Self, GatewayError> {
        let routes = RouteTable::build(channels, config.route_collision)?;
        let route_count = routes.len();
        let router = routes.into_router().layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            router,
            route_count,
            state: AtomicU8::new(GatewayState::UNSTARTED),
            shutdown,
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
        })
    }

    pub fn state(&self) -> GatewayState {
        GatewayState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Number of registered webhook routes, `/health` excluded.
    pub fn route_count(&self) -> usize {
        self.route_count
    }

    /// The fully built router, for serving in-process (e.g. in tests).
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Bind the listener without serving yet.
    ///
    /// Lets the caller hold the port before channels register their webhook
    /// URLs with platforms. `start_async()` serves on this listener. Calling
    /// it again returns the address already bound.
    pub async fn bind(&self) -> Result<SocketAddr, GatewayError> {
        let state = self.state();
        if state != GatewayState::Unstarted {
            return Err(GatewayError::InvalidState {
                expected: GatewayState::Unstarted.as_str(),
                actual: state.as_str(),
            });
        }

        let mut pending = self.listener.lock().await;
        if pending.is_none() {
            *pending = Some(self.open_listener().await?);
        }
        self.local_addr().ok_or_else(|| GatewayError::Bind {
            addr: self.config.bind_addr(),
            reason: "listener has no local address".to_string(),
        })
    }

    /// Serve until [`stop`](Self::stop) is called and in-flight requests
    /// have drained (bounded by `drain_timeout_secs` when set). Binds first
    /// unless [`bind`](Self::bind) already did.
    ///
    /// Only valid from `Unstarted`. If binding fails the server goes back to
    /// `Unstarted`, or to `Stopped` when `stop()` arrived meanwhile; binding
    /// is not retried.
    pub async fn start_async(&self) -> Result<(), GatewayError> {
        if let Err(actual) = self.state.compare_exchange(
            GatewayState::UNSTARTED,
            GatewayState::SERVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(GatewayError::InvalidState {
                expected: GatewayState::Unstarted.as_str(),
                actual: GatewayState::from_raw(actual).as_str(),
            });
        }

        let pending = self.listener.lock().await.take();
        let listener = match pending {
            Some(listener) => listener,
            None => match self.open_listener().await {
                Ok(listener) => listener,
                Err(e) => {
                    self.abandon_start();
                    return Err(e);
                }
            },
        };

        tracing::info!(
            addr = %self.local_addr().map(|a| a.to_string()).unwrap_or_else(|| self.config.bind_addr()),
            routes = self.route_count,
            "Gateway listening"
        );

        let serve = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(stop_requested(self.shutdown.subscribe()))
            .into_future();

        let result = match self.config.drain_timeout() {
            None => serve.await,
            Some(timeout) => {
                tokio::pin!(serve);
                let deadline = async {
                    stop_requested(self.shutdown.subscribe()).await;
                    tokio::time::sleep(timeout).await;
                };
                tokio::select! {
                    result = &mut serve => result,
                    _ = deadline => {
                        tracing::warn!(
                            timeout_secs = timeout.as_secs(),
                            "Drain timeout elapsed, abandoning in-flight requests"
                        );
                        Ok(())
                    }
                }
            }
        };

        self.state.store(GatewayState::STOPPED, Ordering::Release);
        tracing::info!("Gateway stopped");
        result.map_err(|e| GatewayError::Serve(e.to_string()))
    }

    /// Ask the server to stop. Returns immediately; the caller awaiting
    /// `start_async()` observes completion.
    ///
    /// Calling it before `start_async()` moves the server straight to
    /// `Stopped`.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            GatewayState::UNSTARTED,
            GatewayState::STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if !self.shutdown.send_replace(true) {
            tracing::info!("Gateway shutdown requested");
        }
    }

    async fn open_listener(&self) -> Result<TcpListener, GatewayError> {
        let addr = self.config.bind_addr();
        let bind_failed = |reason: String| GatewayError::Bind {
            addr: addr.clone(),
            reason,
        };
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| bind_failed(e.to_string()))?;
        let bound = listener
            .local_addr()
            .map_err(|e| bind_failed(e.to_string()))?;
        let _ = self.local_addr.set(bound);
        Ok(listener)
    }

    /// Leave `Serving` after a failed bind. A `stop()` that landed while
    /// binding still wins.
    fn abandon_start(&self) {
        let next = if *self.shutdown.borrow() {
            GatewayState::STOPPED
        } else {
            GatewayState::UNSTARTED
        };
        self.state.store(next, Ordering::Release);
    }
}

async fn stop_requested(mut rx: watch::Receiver<bool>) {
    // A closed sender means the server itself is gone.
    let _ = rx.wait_for(|stop| *stop).await;
}
