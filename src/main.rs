//! SSE broadcast server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                ┌──────────────────────────────────────────────┐
//!     GET /sse ────────────▶│ http::server (axum, trace, request id)       │
//!                           │        │                                     │
//!                           │        ▼                                     │
//!                           │ http::gatekeeper ──406/429/503──▶ reject     │
//!                           │        │ accept                              │
//!                           │        ▼                                     │
//!                           │ registry (ids, per-address counts, events)   │
//!                           │        │                                     │
//!     ◀── text/event-stream ┼── ClientStream ◀── app code / keep-alive     │
//!                           │                                              │
//!                           │ admin (/admin/*), health, metrics            │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use sse_broadcast::config::{load_config, ServerConfig};
use sse_broadcast::http::HttpServer;
use sse_broadcast::lifecycle::{wait_for_signal, Shutdown};
use sse_broadcast::observability::{logging, metrics};
use sse_broadcast::registry::ClientEvent;

#[derive(Parser)]
#[command(name = "sse-broadcast")]
#[command(about = "Server-Sent Events broadcast endpoint", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "SSE_BROADCAST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sse-broadcast starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        sse_path = %config.sse.path,
        limit_by_ip = config.sse.limit_by_ip,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config);

    server.registry().subscribe(|event| match event {
        ClientEvent::Open { id, last_event_id } => {
            tracing::debug!(client_id = %id, last_event_id = ?last_event_id, "open");
        }
        ClientEvent::Close { id, reason } => {
            tracing::debug!(client_id = %id, %reason, "close");
        }
        ClientEvent::Error { id, error } => {
            tracing::debug!(client_id = %id, %error, "error");
        }
    });

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
