//! Gateway CLI commands.
//!
//! `serve` composes the whole process:
//!
//! ```text
//! AppConfig --> QueueBus --> ChannelManager --> GatewayServer
//!                  │              │ start_all()        │ bind() first, then
//!                  │              │                    │ start_async() until Ctrl-C
//!                  │              └─ dispatch_outbound │
//!                  └─ inbound messages printed as JSON lines on stdout
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{MessageBus, QueueBus};
use crate::channels::ChannelManager;
use crate::cli::init_tracing;
use crate::config::AppConfig;
use crate::error::Result;
use crate::gateway::{GatewayServer, HEALTH_PATH, RouteTable};

/// Command-line values that win over file and env configuration.
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub verbose: bool,
}

impl ServeOverrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.gateway.host = host.clone();
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if self.verbose {
            config.gateway.verbose = true;
        }
    }
}

/// Load configuration and apply command-line overrides on top.
fn load_config(config_path: Option<&Path>, overrides: &ServeOverrides) -> Result<AppConfig> {
    let mut config = AppConfig::load(config_path)?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Build the channels a configuration describes and the gateway over them.
fn compose(config: &AppConfig, bus: Arc<dyn MessageBus>) -> Result<(ChannelManager, GatewayServer)> {
    let channels = ChannelManager::from_config(&config.channels, bus);
    let server = GatewayServer::new(config.gateway.clone(), &channels)?;
    Ok((channels, server))
}

/// Run the gateway until Ctrl-C.
///
/// The listener is bound before channels start, so platforms that probe the
/// webhook URL during registration find the port open.
pub async fn run_serve(config_path: Option<&Path>, overrides: ServeOverrides) -> anyhow::Result<()> {
    let config = load_config(config_path, &overrides)?;
    init_tracing(config.gateway.log_filter());

    let bus = Arc::new(QueueBus::default());
    let (channels, server) = compose(&config, bus.clone() as Arc<dyn MessageBus>)?;
    let server = Arc::new(server);
    let addr = server.bind().await?;
    tracing::info!(%addr, "Gateway bound");

    let failures = channels.start_all().await;
    if !failures.is_empty() {
        tracing::error!(
            failed = failures.len(),
            total = channels.len(),
            "Some channels failed to start"
        );
    }

    if let Some(rx) = bus.take_outbound_receiver().await {
        let channels = channels.clone();
        tokio::spawn(async move { channels.dispatch_outbound(rx).await });
    }

    tokio::spawn({
        let bus = bus.clone();
        async move {
            while let Some(msg) = bus.consume_inbound().await {
                match serde_json::to_string(&msg) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize inbound message"),
                }
            }
        }
    });

    tokio::spawn({
        let server = server.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
                server.stop();
            }
        }
    });

    let result = server.start_async().await;
    channels.stop_all().await;
    result?;
    Ok(())
}

/// Print the webhook route table a configuration produces, without binding.
pub fn print_routes(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path, &ServeOverrides::default())?;
    let bus: Arc<dyn MessageBus> = Arc::new(QueueBus::new(1));
    let channels = ChannelManager::from_config(&config.channels, bus);
    let routes = RouteTable::build(&channels, config.gateway.route_collision)?;

    println!("GET   {HEALTH_PATH}");
    for route in routes.routes() {
        println!("POST  {:<32} -> {}", route.path, route.channel);
    }

    let unrouted: Vec<&str> = channels
        .names()
        .into_iter()
        .filter(|name| !routes.routes().iter().any(|r| r.channel == *name))
        .collect();
    if !unrouted.is_empty() {
        println!("\nNo webhook route: {}", unrouted.join(", "));
    }
    Ok(())
}

/// Probe `GET /health` on a local gateway.
pub async fn run_status(port: u16) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{}/health", port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    println!("Gateway Status");
    println!("==============\n");
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            println!("  Health: OK (reachable at {})", url);
        }
        Ok(resp) => {
            println!("  Health: Degraded (status {})", resp.status());
        }
        Err(_) => {
            println!("  Health: Unreachable ({})", url);
        }
    }
    Ok(())
}
