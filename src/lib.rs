//! speedprobe -- network throughput and latency measurement.
//!
//! The server half streams download payloads and drains uploads over HTTP;
//! the client half ([`throughput::Orchestrator`]) runs timed rounds against
//! it and aggregates the samples.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod throughput;

use anyhow::{Context, Result};

use crate::api::state::AppState;
use crate::config::ServerConfig;

/// Start the HTTP test endpoints and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let addr: std::net::SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address: {}", config.listen_address))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(
        %addr,
        max_download_size = config.max_download_size,
        max_upload_size = config.max_upload_size,
        "speedprobe listening"
    );

    let app = api::router(AppState::new(config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("speedprobe stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
