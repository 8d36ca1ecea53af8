mod config;
mod error;
mod forward;
mod handlers;
mod metrics;
mod models;
mod post_process;
mod rate_limit;
mod state;
mod tokens;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Args;
use crate::handlers::{ops_router, proxy_router};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();

    // creating shared state
    let state = Arc::new(AppState::from_args(&args).context("Failed to create HTTP client")?);

    // health and metrics on a separate port
    if let Some(metrics_port) = args.metrics_port {
        let addr = format!("{}:{}", args.host, metrics_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
        tracing::info!("Health and metrics on http://{}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, ops_router()).await {
                tracing::error!("Metrics listener stopped: {}", e);
            }
        });
    }

    let app = proxy_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Proxy running on http://{}", addr);
    tracing::info!("Forwarding /<host>/<path> to {}://<host>/<path>", args.upstream_scheme);
    tracing::info!(
        "Upstream timeout: {} seconds, request bodies up to {} bytes",
        args.upstream_timeout,
        args.max_body_bytes
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Proxy shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // never resolve, keep serving
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
