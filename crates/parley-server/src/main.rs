//! # Parley Server
//!
//! TCP chat server: clients identify with a username and exchange
//! directed messages through a single router.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley-server
//!
//! # Run with custom config
//! parley-server --config /path/to/parley.toml
//!
//! # Run with environment variables
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 parley-server
//! ```

mod config;
mod metrics;
mod server;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "parley_server=info,parley_core=info,parley_transport=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    let server = server::Server::bind(config).await?;
    tracing::info!("Parley server listening on {}", server.local_addr()?);

    server.run_until_ctrl_c().await
}
