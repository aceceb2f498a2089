use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::sync::{SyncConfig, SyncLogEntry};
use crate::state::AppState;
use crate::sync::conflict::ConflictRecord;
use crate::sync::engine::{BulkSyncOptions, BulkSyncSummary, ConnectionStatus, SyncOutcome};
use crate::sync::log::{SyncStats, DEFAULT_LOG_LIMIT};
use crate::sync::webhook::{WebhookOutcome, SIGNATURE_HEADER};
use crate::sync::{ConflictResolution, SyncDirection, SyncOptions};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncContactRequest {
    pub direction: SyncDirection,
    #[serde(default)]
    pub force_sync: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub contact_id: Uuid,
    pub crm_id: String,
    pub resolution: ConflictResolution,
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/sync/config
pub async fn handle_get_config(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let config = state.engine.get_config().await?;
    Ok(Json(json!({
        "configured": config.is_some(),
        "config": config.map(|c| c.redacted()),
    })))
}

/// PUT /api/v1/sync/config
/// Saving restarts the real-time timer so interval and autoSync changes apply.
pub async fn handle_save_config(
    State(state): State<AppState>,
    Json(req): Json<SyncConfig>,
) -> Result<Json<SyncConfig>, AppError> {
    let saved = state.engine.save_config(req).await?;
    if saved.auto_sync || state.realtime.is_running().await {
        state.realtime.start().await?;
    }
    Ok(Json(saved.redacted()))
}

/// POST /api/v1/sync/test-connection
pub async fn handle_test_connection(
    State(state): State<AppState>,
) -> Result<Json<ConnectionStatus>, AppError> {
    Ok(Json(state.engine.test_connection().await?))
}

/// POST /api/v1/sync/contacts/:id
pub async fn handle_sync_contact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SyncContactRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    let mut options = SyncOptions::new(req.direction);
    if req.force_sync {
        options = options.forced();
    }
    Ok(Json(state.engine.sync_contact(id, options).await?))
}

/// POST /api/v1/sync/bulk
pub async fn handle_bulk_sync(
    State(state): State<AppState>,
    Json(req): Json<BulkSyncOptions>,
) -> Result<Json<BulkSyncSummary>, AppError> {
    Ok(Json(state.engine.bulk_sync(req).await?))
}

/// GET /api/v1/sync/conflicts
pub async fn handle_get_conflicts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConflictRecord>>, AppError> {
    Ok(Json(state.engine.get_conflicts().await?))
}

/// POST /api/v1/sync/conflicts/resolve
pub async fn handle_resolve_conflict(
    State(state): State<AppState>,
    Json(req): Json<ResolveConflictRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    let outcome = state
        .engine
        .resolve_conflict(req.contact_id, &req.crm_id, req.resolution)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/sync/logs
pub async fn handle_list_logs(
    State(state): State<AppState>,
    Query(params): Query<LogQuery>,
) -> Result<Json<Vec<SyncLogEntry>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(state.engine.list_logs(limit).await?))
}

/// GET /api/v1/sync/stats
pub async fn handle_stats(State(state): State<AppState>) -> Result<Json<SyncStats>, AppError> {
    Ok(Json(state.engine.stats().await?))
}

/// POST /api/v1/sync/realtime/start
pub async fn handle_realtime_start(
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let running = state.realtime.start().await?;
    Ok(Json(json!({ "running": running })))
}

/// POST /api/v1/sync/realtime/stop
pub async fn handle_realtime_stop(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.realtime.stop().await;
    Json(json!({ "running": false, "stopped": stopped }))
}

/// POST /api/v1/webhooks/fish
/// Takes the raw body: the signature covers the exact bytes Fish sent.
pub async fn handle_fish_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(state.engine.handle_webhook(&body, signature).await?))
}
