//! hixie-gateway: exposes a TCP service to browser scripts over the legacy
//! (key1/key2) WebSocket handshake.
//!
//! Features:
//! - Challenge-response handshake with byte-exact legacy response headers
//! - `0x00 ... 0xFF` text framing, several frames per read
//! - One task per connection, no shared state between sessions
//! - Optional connection limit and read timeout
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod server;

use config::Config;
use protocols::websocket::UppercaseEcho;
use server::Server;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        ws_host = %config.endpoints.ws_host,
        ws_port = config.endpoints.ws_port,
        ws_path = %config.endpoints.ws_path,
        http_host = %config.endpoints.http_host,
        http_port = config.endpoints.http_port,
        backlog = config.backlog,
        workers = ?config.workers,
        max_connections = ?config.max_connections,
        read_timeout = ?config.read_timeout,
        "Starting hixie-gateway"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(serve(config))
}

/// Accept connections until the listener fails or the process is interrupted.
async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, Arc::new(UppercaseEcho)).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, closing connections");
        }
    }

    Ok(())
}
