//! Fish webhook ingestion.
//!
//! Signatures are `hex(HMAC-SHA256(webhookSecret, raw body))`, compared in
//! constant time. Unlike the rest of the sync code, failures here are returned
//! to the caller after logging so the HTTP layer can answer non-2xx and Fish
//! retries the delivery.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use super::conflict::apply_remote;
use super::log::record;
use super::SyncEngine;
use crate::contacts::update_contact;
use crate::errors::AppError;
use crate::fish_client::RemoteContact;
use crate::models::contact::{
    Contact, ContactSource, ContactStatus, ContactType, CrmSyncStatus, NewContact,
};
use crate::models::sync::{LogStatus, SyncLogEntry, SyncOperation};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-fish-signature";
pub const DELETED_TAG: &str = "deleted_from_fish";
pub const MERGED_TAG: &str = "merged_in_fish";

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct DeletedData {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergedData {
    primary_id: String,
    secondary_id: String,
}

#[derive(Debug)]
enum WebhookEvent {
    Upsert(RemoteContact),
    Deleted(DeletedData),
    Merged(MergedData),
}

impl WebhookEvent {
    fn parse(payload: WebhookPayload) -> Result<Self, AppError> {
        let invalid = |e: serde_json::Error| {
            AppError::Validation(format!("Invalid data for {}: {e}", payload.event))
        };
        match payload.event.as_str() {
            "contact.created" | "contact.updated" => serde_json::from_value(payload.data.clone())
                .map(WebhookEvent::Upsert)
                .map_err(invalid),
            "contact.deleted" => serde_json::from_value(payload.data.clone())
                .map(WebhookEvent::Deleted)
                .map_err(invalid),
            "contact.merged" => serde_json::from_value(payload.data.clone())
                .map(WebhookEvent::Merged)
                .map_err(invalid),
            other => Err(AppError::Validation(format!(
                "Unsupported webhook event '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAction {
    Created,
    Updated,
    /// An unlinked local contact was matched and linked to the Fish id.
    Linked,
    Deactivated,
    Merged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub event: String,
    pub action: WebhookAction,
    pub contact_id: Uuid,
    pub crm_id: String,
}

fn compute_hmac(secret: &str, body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Checks a signature header value (hex, optionally prefixed `sha256=`).
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    let Some(expected) = compute_hmac(secret, body) else {
        return false;
    };
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected.as_slice()).into()
}

impl SyncEngine {
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        let config = self.require_config().await?;
        if config.webhook_secret.is_empty() {
            return Err(AppError::NotConfigured);
        }
        if !config.features.real_time_updates {
            return Err(AppError::Validation("Real-time updates are disabled".into()));
        }

        let valid = signature
            .map(|s| verify_signature(&config.webhook_secret, body, s))
            .unwrap_or(false);
        if !valid {
            self.log_webhook(
                LogStatus::Error,
                "Rejected webhook with invalid signature".into(),
                None,
                None,
                json!({ "signaturePresent": signature.is_some() }),
            )
            .await;
            warn!("Rejected Fish webhook: bad or missing signature");
            return Err(AppError::Unauthorized);
        }

        let parsed = serde_json::from_slice::<WebhookPayload>(body)
            .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {e}")))
            .and_then(|payload| {
                let event = payload.event.clone();
                WebhookEvent::parse(payload).map(|parsed| (event, parsed))
            });
        let (event_name, event) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                self.log_webhook(LogStatus::Error, e.to_string(), None, None, Value::Null)
                    .await;
                return Err(e);
            }
        };

        let result = match event {
            WebhookEvent::Upsert(remote) => self.upsert_from_webhook(&event_name, remote).await,
            WebhookEvent::Deleted(data) => self.deactivate_from_webhook(&event_name, data).await,
            WebhookEvent::Merged(data) => self.merge_from_webhook(&event_name, data).await,
        };

        match &result {
            Ok(outcome) => {
                self.log_webhook(
                    LogStatus::Success,
                    format!("Processed {event_name}"),
                    Some(outcome.contact_id),
                    Some(&outcome.crm_id),
                    json!({ "event": event_name, "action": outcome.action }),
                )
                .await;
                info!(
                    "Webhook {event_name}: {:?} contact {}",
                    outcome.action, outcome.contact_id
                );
            }
            Err(e) => {
                self.log_webhook(
                    LogStatus::Error,
                    format!("Failed to process {event_name}: {e}"),
                    None,
                    None,
                    json!({ "event": event_name }),
                )
                .await;
            }
        }
        result
    }

    async fn log_webhook(
        &self,
        status: LogStatus,
        message: String,
        contact_id: Option<Uuid>,
        crm_id: Option<&str>,
        details: Value,
    ) {
        let mut entry = SyncLogEntry::new(SyncOperation::Webhook, status, message)
            .crm(crm_id)
            .details(details);
        entry.contact_id = contact_id;
        record(self.store(), entry).await;
    }

    async fn contact_for_crm_id(&self, crm_id: &str) -> Result<Contact, AppError> {
        self.store()
            .find_contact_by_crm_id(crm_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No contact linked to Fish id {crm_id}")))
    }

    async fn upsert_from_webhook(
        &self,
        event: &str,
        remote: RemoteContact,
    ) -> Result<WebhookOutcome, AppError> {
        let config = self.require_config().await?;
        let map_custom_fields = config.features.custom_field_mapping;
        let now = Utc::now();

        let (existing, action) = match self.store().find_contact_by_crm_id(&remote.id).await? {
            Some(linked) => (Some(linked), WebhookAction::Updated),
            None => (self.unlinked_match(&remote).await?, WebhookAction::Linked),
        };
        if let Some(existing) = existing {
            let crm_id = remote.id.clone();
            let updated = update_contact(self.store(), existing.id, None, |c| {
                apply_remote(c, &remote, map_custom_fields);
                c.crm_id = Some(crm_id.clone());
                c.crm_sync_status = Some(CrmSyncStatus::Synced);
                c.crm_last_sync = Some(now);
            })
            .await?;
            return Ok(WebhookOutcome {
                event: event.to_string(),
                action,
                contact_id: updated.id,
                crm_id: remote.id,
            });
        }

        let mut new = NewContact::new(
            remote.contact_type.unwrap_or(ContactType::Client),
            &remote.name,
            &remote.email,
            ContactSource::CrmIntegration,
        );
        new.phone = remote.phone.clone();
        new.company = remote.company.clone();
        new.status = remote.status.unwrap_or(ContactStatus::Active);
        new.tags = remote.tags.clone();
        new.notes = remote.notes.clone();
        if map_custom_fields {
            new.custom_fields = remote.custom_fields.clone();
        }

        let mut contact = new.into_contact(now);
        contact.crm_id = Some(remote.id.clone());
        contact.crm_sync_status = Some(CrmSyncStatus::Synced);
        contact.crm_last_sync = Some(now);
        // created straight in the store: no push back to Fish
        self.store().insert_contact(&contact).await?;

        Ok(WebhookOutcome {
            event: event.to_string(),
            action: WebhookAction::Created,
            contact_id: contact.id,
            crm_id: remote.id,
        })
    }

    /// Local contact a remote record belongs to but that has no Fish id yet:
    /// first by `externalId` (the local id sent on push), then by `(email, type)`.
    async fn unlinked_match(&self, remote: &RemoteContact) -> Result<Option<Contact>, AppError> {
        let unlinked = |c: &Contact| c.crm_id.is_none();

        if let Some(local_id) = remote
            .external_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            if let Some(contact) = self.store().get_contact(local_id).await? {
                if unlinked(&contact) {
                    return Ok(Some(contact));
                }
            }
        }

        let contact_type = remote.contact_type.unwrap_or(ContactType::Client);
        let email = remote.email.trim();
        Ok(self
            .store()
            .list_contacts_by_type(contact_type)
            .await?
            .into_iter()
            .find(|c| unlinked(c) && c.email.eq_ignore_ascii_case(email)))
    }

    async fn deactivate_from_webhook(
        &self,
        event: &str,
        data: DeletedData,
    ) -> Result<WebhookOutcome, AppError> {
        let existing = self.contact_for_crm_id(&data.id).await?;

        let updated = update_contact(self.store(), existing.id, None, |c| {
            c.status = ContactStatus::Inactive;
            c.add_tag(DELETED_TAG);
        })
        .await?;

        Ok(WebhookOutcome {
            event: event.to_string(),
            action: WebhookAction::Deactivated,
            contact_id: updated.id,
            crm_id: data.id,
        })
    }

    async fn merge_from_webhook(
        &self,
        event: &str,
        data: MergedData,
    ) -> Result<WebhookOutcome, AppError> {
        if data.primary_id == data.secondary_id {
            return Err(AppError::Validation(format!(
                "Cannot merge Fish contact {} into itself",
                data.primary_id
            )));
        }
        let primary = self.contact_for_crm_id(&data.primary_id).await?;
        let secondary = self.contact_for_crm_id(&data.secondary_id).await?;

        let merged = update_contact(self.store(), primary.id, None, |c| {
            for tag in &secondary.tags {
                c.add_tag(tag);
            }
            for (key, value) in &secondary.custom_fields {
                c.custom_fields
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            if let Some(extra) = secondary.notes.as_deref().filter(|n| !n.trim().is_empty()) {
                c.notes = Some(match c.notes.as_deref() {
                    Some(existing) if !existing.trim().is_empty() => {
                        format!("{existing}\n\n{extra}")
                    }
                    _ => extra.to_string(),
                });
            }
        })
        .await?;

        update_contact(self.store(), secondary.id, None, |c| {
            c.status = ContactStatus::Inactive;
            c.add_tag(MERGED_TAG);
        })
        .await?;

        Ok(WebhookOutcome {
            event: event.to_string(),
            action: WebhookAction::Merged,
            contact_id: merged.id,
            crm_id: data.primary_id,
        })
    }
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    hex::encode(compute_hmac(secret, body).unwrap_or_default())
}
