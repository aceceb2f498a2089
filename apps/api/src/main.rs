mod config;
mod contacts;
mod custom_fields;
mod db;
mod errors;
mod fish_client;
mod models;
mod routes;
mod state;
mod store;
mod submissions;
mod sync;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StoreBackend};
use crate::db::create_pool;
use crate::fish_client::FishClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting crmsync v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            Arc::new(PgStore::new(create_pool(url).await?))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let crm = Arc::new(FishClient::new(config.crm_timeout)?);
    info!("Fish client initialized (timeout: {:?})", config.crm_timeout);

    let state = AppState::new(config.clone(), store, crm);

    if config.watcher_autostart {
        // catch up on anything submitted while we were down
        match state.watcher.process_pending_submissions().await {
            Ok(report) => info!(
                "Initial submission sweep: {} converted, {} duplicates, {} failed",
                report.converted, report.duplicates, report.failed
            ),
            Err(e) => warn!("Initial submission sweep failed: {e}"),
        }
        state.watcher.start().await;
    }

    match state.realtime.start().await {
        Ok(true) => info!("Real-time sync timer started"),
        Ok(false) => info!("Real-time sync not started (Fish not configured or autoSync off)"),
        Err(e) => warn!("Could not start real-time sync: {e}"),
    }

    let app = build_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the portal domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.watcher.stop().await;
    state.realtime.stop().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
