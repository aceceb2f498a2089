use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::custom_fields::registry::{create_field, delete_field, list_fields, update_field};
use crate::errors::AppError;
use crate::models::custom_field::{CustomField, CustomFieldPatch, NewCustomField};
use crate::state::AppState;

/// GET /api/v1/custom-fields
pub async fn handle_list_fields(
    State(state): State<AppState>,
) -> Result<Json<Vec<CustomField>>, AppError> {
    Ok(Json(list_fields(state.store.as_ref()).await?))
}

/// POST /api/v1/custom-fields
pub async fn handle_create_field(
    State(state): State<AppState>,
    Json(req): Json<NewCustomField>,
) -> Result<(StatusCode, Json<CustomField>), AppError> {
    let field = create_field(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(field)))
}

/// PATCH /api/v1/custom-fields/:id
pub async fn handle_update_field(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CustomFieldPatch>,
) -> Result<Json<CustomField>, AppError> {
    Ok(Json(update_field(state.store.as_ref(), id, req).await?))
}

/// DELETE /api/v1/custom-fields/:id
pub async fn handle_delete_field(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let cleared = delete_field(state.store.as_ref(), id).await?;
    Ok(Json(json!({ "id": id, "deleted": true, "clearedFrom": cleared })))
}
