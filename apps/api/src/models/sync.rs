use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Sync,
    Webhook,
    BulkSync,
    ConflictResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
    Warning,
}

/// Append-only record of a sync, webhook, bulk or resolution operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub id: Uuid,
    pub operation: SyncOperation,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn new(operation: SyncOperation, status: LogStatus, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            status,
            contact_id: None,
            crm_id: None,
            message: message.into(),
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn contact(mut self, contact_id: Uuid) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn crm(mut self, crm_id: Option<&str>) -> Self {
        self.crm_id = crm_id.map(str::to_string);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    CrmWins,
    LocalWins,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFeatures {
    pub bidirectional_sync: bool,
    pub real_time_updates: bool,
    pub bulk_operations: bool,
    pub custom_field_mapping: bool,
}

impl Default for SyncFeatures {
    fn default() -> Self {
        Self {
            bidirectional_sync: true,
            real_time_updates: true,
            bulk_operations: true,
            custom_field_mapping: true,
        }
    }
}

/// Singleton Fish CRM integration settings. When absent, sync is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub api_key: String,
    pub api_url: String,
    #[serde(default)]
    pub webhook_secret: String,
    pub sync_interval: u32,
    pub auto_sync: bool,
    pub conflict_resolution: ConflictPolicy,
    #[serde(default)]
    pub features: SyncFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncConfig {
    /// Whether local writes should trigger a CRM push.
    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty() && self.auto_sync
    }

    /// Copy safe to hand to the admin UI: secrets reduced to their last 4 chars.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: mask(&self.api_key),
            webhook_secret: mask(&self.webhook_secret),
            ..self.clone()
        }
    }
}

const MASK: &str = "****";

/// Whether a value is a redacted secret echoed back by a client.
pub fn is_masked(value: &str) -> bool {
    value.starts_with(MASK)
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    // too short to reveal any of it
    if secret.chars().count() <= 4 {
        return MASK.to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{MASK}{tail}")
}
