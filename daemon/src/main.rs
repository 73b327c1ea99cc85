//! wsgate Daemon
//!
//! Serves the login page, authenticates users through the configured
//! verifiers and relays their channels to per-session bridges.

use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use wsgate_daemon::{GatewayConfig, metrics, run_gateway};

/// wsgate Daemon - authenticating WebSocket gateway
#[derive(Parser, Debug)]
#[command(name = "wsgated")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("wsgate Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            let config = GatewayConfig::load(path).await?;
            info!("Loaded configuration from {}", path);
            config
        }
        None => {
            info!("No configuration file given, using defaults");
            GatewayConfig::default()
        }
    };

    // Start metrics server
    let metrics_handle = metrics::start_server(&config.monitoring);

    info!("Starting gateway on {}", config.server.bind);
    let result = run_gateway(&config).await;

    // Cleanup
    metrics_handle.abort();

    result
}
