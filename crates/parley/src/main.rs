//! # parley
//!
//! Parley messaging server binary — wires configuration, logging, and
//! metrics together and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;

use parley_core::logging;
use parley_server::config::ServerConfig;
use parley_server::metrics::install_recorder;
use parley_server::server::ParleyServer;

/// Parley messaging server.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time messaging server", version)]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "PARLEY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "PARLEY_PORT", default_value = "4020")]
    port: u16,

    /// Secret used to verify credential tokens.
    #[arg(long, env = "PARLEY_AUTH_SECRET", hide_env_values = true)]
    auth_secret: String,

    /// Maximum concurrent connections.
    #[arg(long, env = "PARLEY_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Seconds a new channel may take to present its handshake.
    #[arg(long, env = "PARLEY_HANDSHAKE_TIMEOUT_SECS")]
    handshake_timeout_secs: Option<u64>,

    /// Log level filter (e.g. `info`, `parley_server=debug`).
    #[arg(long, env = "PARLEY_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log);

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        auth_secret: args.auth_secret,
        max_connections: args.max_connections.unwrap_or(defaults.max_connections),
        handshake_timeout_secs: args
            .handshake_timeout_secs
            .unwrap_or(defaults.handshake_timeout_secs),
        ..defaults
    };

    let metrics_handle = install_recorder().context("Failed to install metrics recorder")?;
    let server = ParleyServer::new(config).with_metrics(metrics_handle);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("parley listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
