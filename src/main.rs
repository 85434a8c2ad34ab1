//! Render Cache - tiered cache server for rendered pages and fetch results
//!
//! Serves the invalidation, inspection and cache endpoints on top of the
//! shared-store tier with its local fallback.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use render_cache::api::{create_router, AppState};
use render_cache::store::ConnectionManager;
use render_cache::tasks::spawn_reconnect_task;
use render_cache::Config;

/// Main entry point for the render cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the cache runtime and start connecting to the shared store
/// 4. Start the reconnect supervisor
/// 5. Serve HTTP on the configured port
/// 6. On SIGINT/SIGTERM stop the supervisor and close the connection
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "render_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Render Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: prefix={}, local_capacity={}, default_ttl={}s, port={}, compression={}",
        config.key_prefix,
        config.local_capacity,
        config.default_ttl,
        config.server_port,
        config.compression
    );

    let state = AppState::from_config(&config);
    let connection = state.cache.connection().clone();
    match connection.target() {
        Some(target) => info!("Shared store configured at {}", target),
        None => warn!("Shared tier disabled, serving from the local store only"),
    }
    connection.ensure_started();

    let reconnect_handle = spawn_reconnect_task(connection.clone(), config.reconnect_interval);
    info!("Reconnect supervisor started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(reconnect_handle, connection))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the supervisor
/// and closes the shared-store connection.
async fn shutdown_signal(
    reconnect_handle: tokio::task::JoinHandle<()>,
    connection: ConnectionManager,
) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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

    reconnect_handle.abort();
    warn!("Reconnect supervisor aborted");
    connection.close().await;
}
