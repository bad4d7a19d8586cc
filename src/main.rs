//! Feed Cache - A read-through cache in front of a rate-metered JSON API
//!
//! Serves cached resources and dashboard aggregates over HTTP.

use std::net::SocketAddr;

use serde_json::Value;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feed_cache::api::{create_router, AppState};
use feed_cache::{Config, Scheduler};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Build the cache layer, upstream sources and dashboard aggregate
/// 4. Start the refresh scheduler
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feed_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting feed cache");

    let config = Config::from_env();
    if let Err(e) = config.validate() {
        error!("{e}");
        return Err(e.into());
    }
    info!(
        "Configuration loaded: upstream={}, resources={:?}, ttl={:?}, poll={:?}, port={}",
        config.upstream_url, config.resources, config.default_ttl, config.poll_interval, config.server_port
    );

    let state = AppState::from_config(&config)?;
    state.scheduler.start();

    let layer = state.layer.clone();
    let scheduler = state.scheduler.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    layer.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the scheduler.
async fn shutdown_signal(scheduler: Scheduler<Value>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    scheduler.stop();
    warn!("Refresh scheduler stopped");
}
