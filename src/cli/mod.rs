//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the gateway (`serve`)
//! - Printing the webhook route table a config produces (`routes`)
//! - Probing a running gateway (`status`)

mod gateway;

pub use gateway::{ServeOverrides, print_routes, run_serve, run_status};

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "hookgate")]
#[command(about = "Webhook gateway for messaging-platform channels")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file path (.json or YAML)
    #[arg(short, long, global = true, env = "HOOKGATE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway and serve until Ctrl-C
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Log at info level, including HTTP access lines
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the webhook routes the configuration would register
    Routes,

    /// Check whether a local gateway answers its health check
    Status {
        /// Port the gateway listens on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve {
            host,
            port,
            verbose,
        } => {
            let overrides = ServeOverrides {
                host,
                port,
                verbose,
            };
            run_serve(cli.config.as_deref(), overrides).await
        }
        Command::Routes => {
            init_tracing("warn");
            print_routes(cli.config.as_deref())
        }
        Command::Status { port } => {
            init_tracing("warn");
            run_status(port).await
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
