use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::config::StoreBackend;
use crate::state::AppState;

/// GET /health
/// Returns service version plus background task state.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let store = match state.config.store_backend {
        StoreBackend::Postgres => "postgres",
        StoreBackend::Memory => "memory",
    };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "crmsync",
        "store": store,
        "watcherRunning": state.watcher.is_running().await,
        "realtimeSyncRunning": state.realtime.is_running().await,
    }))
}
