//! # votehub
//!
//! Group voting server binary. Loads configuration, installs logging and
//! serves the WebSocket endpoint until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use vote_telemetry::{init_telemetry, TelemetryConfig};

/// Real-time group voting server.
#[derive(Parser, Debug)]
#[command(name = "votehub", about = "Real-time group voting server")]
struct Cli {
    /// JSON config file merged over the defaults.
    #[arg(long, default_value = "votehub.json")]
    config: PathBuf,

    /// Host to bind (overrides config and environment).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config and environment).
    #[arg(long)]
    port: Option<u16>,

    /// Default log level. `RUST_LOG` takes precedence when set.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        ..TelemetryConfig::default()
    });

    let mut config = vote_server::load_config(Some(&cli.config))
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let bind = config.bind_addr();
    let handle = vote_server::start(config)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(port = handle.port(), "votehub ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    handle.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
