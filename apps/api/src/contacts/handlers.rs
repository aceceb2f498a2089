use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::contact::{Contact, ContactPatch, ContactType, NewContact};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ContactListQuery {
    #[serde(rename = "type")]
    pub contact_type: Option<ContactType>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactRequest {
    #[serde(flatten)]
    pub patch: ContactPatch,
    pub expected_version: Option<i64>,
}

/// GET /api/v1/contacts
pub async fn handle_list_contacts(
    State(state): State<AppState>,
    Query(params): Query<ContactListQuery>,
) -> Result<Json<Vec<Contact>>, AppError> {
    let contacts = match params.contact_type {
        Some(contact_type) => state.contacts.get_by_type(contact_type).await?,
        None => state.contacts.list().await?,
    };
    Ok(Json(contacts))
}

/// POST /api/v1/contacts
pub async fn handle_create_contact(
    State(state): State<AppState>,
    Json(req): Json<NewContact>,
) -> Result<(StatusCode, Json<Contact>), AppError> {
    let contact = state.contacts.create(req).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

/// GET /api/v1/contacts/:id
pub async fn handle_get_contact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Contact>, AppError> {
    Ok(Json(state.contacts.get(id).await?))
}

/// PATCH /api/v1/contacts/:id
pub async fn handle_update_contact(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateContactRequest>,
) -> Result<Json<Contact>, AppError> {
    let contact = state
        .contacts
        .update(id, req.patch, req.expected_version)
        .await?;
    Ok(Json(contact))
}
