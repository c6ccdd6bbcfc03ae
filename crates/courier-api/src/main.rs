//! Courier API Server

use anyhow::Context;
use clap::Parser;
use courier_api::{AppState, routes};
use courier_config::{LogFormat, ServiceConfig, StoreBackend};
use courier_core::JobStore;
use courier_db::{PgJobStore, create_pool, run_migrations};
use courier_queue::{MemoryJobStore, Reaper};
use courier_realtime::start_heartbeat;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "courier-server")]
#[command(about = "Job queue and real-time broadcast server")]
#[command(version)]
struct Args {
    /// Path to the KDL configuration file
    #[arg(short, long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(config.log.format);

    let store = open_store(&config).await?;
    info!(store = store.name(), "Job store ready");

    let state = AppState::new(store, &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reaper_handle = match config.queue.reclaim_after {
        Some(reclaim_after) => Some(
            Reaper::new(
                state.engine.clone(),
                reclaim_after,
                config.queue.sweep_interval,
            )
            .spawn(shutdown_rx.clone()),
        ),
        None => {
            info!("Reclaim sweep disabled");
            None
        }
    };
    let heartbeat_handle = start_heartbeat(
        state.registry.clone(),
        config.realtime.heartbeat,
        shutdown_rx,
    );

    let registry = state.registry.clone();
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped accepting connections, cleaning up");
    registry.shutdown_all().await;
    let _ = shutdown_tx.send(true);

    let grace = config.server.shutdown_grace;
    let background = async {
        if let Some(handle) = reaper_handle {
            let _ = handle.await;
        }
        let _ = heartbeat_handle.await;
    };
    if tokio::time::timeout(grace, background).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "Background tasks did not stop in time");
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn open_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match config.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryJobStore::new())),
        StoreBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .context("postgres store needs a database url")?;
            info!("Connecting to database...");
            let pool = create_pool(url, config.database.max_connections).await?;
            run_migrations(&pool).await?;
            info!("Database connected, migrations applied");
            Ok(Arc::new(PgJobStore::new(pool)))
        }
    }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
