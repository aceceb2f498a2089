use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::submission::{Submission, SubmissionKind};
use crate::state::AppState;
use crate::submissions::submit;
use crate::submissions::watcher::ProcessReport;

/// POST /api/v1/submissions/client-requests
pub async fn handle_client_request(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let submission = submit(state.store.as_ref(), SubmissionKind::ClientRequest, payload).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// POST /api/v1/submissions/interpreter-applications
pub async fn handle_interpreter_application(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    let submission = submit(
        state.store.as_ref(),
        SubmissionKind::InterpreterApplication,
        payload,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// POST /api/v1/submissions/process
pub async fn handle_process_pending(
    State(state): State<AppState>,
) -> Result<Json<ProcessReport>, AppError> {
    Ok(Json(state.watcher.process_pending_submissions().await?))
}

/// POST /api/v1/submissions/watcher/start
pub async fn handle_watcher_start(State(state): State<AppState>) -> Json<Value> {
    let started = state.watcher.start().await;
    Json(json!({ "running": true, "started": started }))
}

/// POST /api/v1/submissions/watcher/stop
pub async fn handle_watcher_stop(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.watcher.stop().await;
    Json(json!({ "running": false, "stopped": stopped }))
}
