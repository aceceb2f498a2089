use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::conflict::{
    apply_remote, detect_conflict, merge_for_resolution, reconstruct_conflicts, ConflictRecord,
    ConflictSnapshot,
};
use super::log::{compute_stats, record, SyncStats, ANALYTICS_WINDOW, MAX_LOG_LIMIT};
use super::{ConflictResolution, ErrorPolicy, SyncDirection, SyncOptions};
use crate::contacts::update_contact;
use crate::errors::AppError;
use crate::fish_client::{ContactPayload, CrmApi, CrmEndpoint, CrmError, RemoteContact, PUSH_SOURCE};
use crate::models::contact::{Contact, CrmSyncStatus};
use crate::models::sync::{
    is_masked, ConflictPolicy, LogStatus, SyncConfig, SyncLogEntry, SyncOperation,
};
use crate::store::Store;

pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Upper bound on contacts picked automatically when no ids are given.
pub const AUTO_SELECT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcomeStatus {
    Synced,
    Conflict,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub contact_id: Uuid,
    pub status: SyncOutcomeStatus,
    pub crm_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflict_fields: Vec<String>,
    pub message: String,
}

impl SyncOutcome {
    fn synced(contact: &Contact, message: impl Into<String>) -> Self {
        Self {
            contact_id: contact.id,
            status: SyncOutcomeStatus::Synced,
            crm_id: contact.crm_id.clone(),
            conflict_fields: Vec::new(),
            message: message.into(),
        }
    }

    fn failed(contact_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            contact_id,
            status: SyncOutcomeStatus::Failed,
            crm_id: None,
            conflict_fields: Vec::new(),
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SyncOutcomeStatus::Failed
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncOptions {
    pub direction: SyncDirection,
    pub contact_ids: Option<Vec<Uuid>>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncSummary {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
}

/// Pushes and pulls contacts to and from Fish and records every outcome.
///
/// CRM failures never block local writes: they are logged, the contact is
/// flagged `crmSyncStatus=error`, and `ErrorPolicy` decides whether the
/// caller sees the error.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    crm: Arc<dyn CrmApi>,
    batch_delay: Duration,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, crm: Arc<dyn CrmApi>, batch_delay: Duration) -> Self {
        Self {
            store,
            crm,
            batch_delay,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) async fn require_config(&self) -> Result<SyncConfig, AppError> {
        self.store
            .get_sync_config()
            .await?
            .ok_or(AppError::NotConfigured)
    }

    pub async fn get_config(&self) -> Result<Option<SyncConfig>, AppError> {
        Ok(self.store.get_sync_config().await?)
    }

    pub async fn save_config(&self, mut config: SyncConfig) -> Result<SyncConfig, AppError> {
        if config.sync_interval < 1 {
            return Err(AppError::Validation(
                "syncInterval must be at least 1 minute".into(),
            ));
        }
        if !config.api_key.trim().is_empty() && config.api_url.trim().is_empty() {
            return Err(AppError::Validation(
                "apiUrl is required when an API key is set".into(),
            ));
        }
        // masked values echoed back from the UI keep the stored secret
        if is_masked(&config.api_key) || is_masked(&config.webhook_secret) {
            let current = self.store.get_sync_config().await?.ok_or_else(|| {
                AppError::Validation("Masked secrets cannot be saved as the first config".into())
            })?;
            if is_masked(&config.api_key) {
                config.api_key = current.api_key;
            }
            if is_masked(&config.webhook_secret) {
                config.webhook_secret = current.webhook_secret;
            }
        }
        config.updated_at = Some(Utc::now());
        self.store.put_sync_config(&config).await?;
        info!(
            "Saved Fish sync config (autoSync={}, interval={}m, policy={:?})",
            config.auto_sync, config.sync_interval, config.conflict_resolution
        );
        Ok(config)
    }

    /// Whether newly created contacts should be pushed.
    pub async fn push_enabled(&self) -> bool {
        match self.store.get_sync_config().await {
            Ok(Some(config)) => config.is_enabled(),
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read sync config: {e:#}");
                false
            }
        }
    }

    /// Create-time push. Never fails: `None` when sync is off, otherwise the
    /// outcome (possibly `Failed`) of a logged push.
    pub async fn push_new_contact(&self, contact_id: Uuid) -> Option<SyncOutcome> {
        if !self.push_enabled().await {
            return None;
        }
        let options =
            SyncOptions::new(SyncDirection::ToRemote).on_error(ErrorPolicy::LogAndContinue);
        match self.sync_contact(contact_id, options).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Create-time push for {contact_id} did not run: {e}");
                Some(SyncOutcome::failed(contact_id, e.to_string()))
            }
        }
    }

    /// Syncs one contact in the requested direction.
    ///
    /// Missing config, unknown contact and local validation failures are
    /// returned as errors regardless of `on_error` and are not logged.
    pub async fn sync_contact(
        &self,
        contact_id: Uuid,
        options: SyncOptions,
    ) -> Result<SyncOutcome, AppError> {
        let config = self.require_config().await?;
        if options.direction == SyncDirection::Bidirectional && !config.features.bidirectional_sync
        {
            return Err(AppError::Validation(
                "Bidirectional sync is disabled".into(),
            ));
        }
        let contact = self
            .store
            .get_contact(contact_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Contact {contact_id} not found")))?;

        let result = self.run_direction(&config, contact, options).await;
        match (result, options.on_error) {
            (Ok(outcome), _) => Ok(outcome),
            (Err(AppError::Crm(e)), ErrorPolicy::LogAndContinue) => {
                Ok(SyncOutcome::failed(contact_id, e.to_string()))
            }
            (Err(e), _) => Err(e),
        }
    }

    async fn run_direction(
        &self,
        config: &SyncConfig,
        contact: Contact,
        options: SyncOptions,
    ) -> Result<SyncOutcome, AppError> {
        match options.direction {
            SyncDirection::ToRemote => self.push(config, contact).await,
            SyncDirection::FromRemote => self.pull(config, contact, options.force_sync).await,
            // two passes: push, then pull what Fish now holds
            SyncDirection::Bidirectional => {
                let contact_id = contact.id;
                let pushed = self.push(config, contact).await?;
                let contact = self.store.get_contact(contact_id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Contact {contact_id} not found"))
                })?;
                match self.pull(config, contact, options.force_sync).await? {
                    pulled if pulled.status == SyncOutcomeStatus::Synced => Ok(SyncOutcome {
                        message: format!("{}; {}", pushed.message, pulled.message),
                        ..pulled
                    }),
                    other => Ok(other),
                }
            }
        }
    }

    fn payload(contact: &Contact, config: &SyncConfig) -> ContactPayload {
        ContactPayload {
            name: contact.name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            company: contact.company.clone(),
            contact_type: contact.contact_type,
            status: contact.status,
            tags: contact.tags.clone(),
            custom_fields: config
                .features
                .custom_field_mapping
                .then(|| contact.custom_fields.clone()),
            external_id: contact.id.to_string(),
            source: PUSH_SOURCE.to_string(),
        }
    }

    /// Logs a remote failure and flags the contact. Returns the error for propagation.
    async fn remote_failure(
        &self,
        contact: &Contact,
        direction: SyncDirection,
        error: CrmError,
    ) -> AppError {
        let contact_id = contact.id;
        if let Err(e) = update_contact(self.store.as_ref(), contact_id, None, |c| {
            c.crm_sync_status = Some(CrmSyncStatus::Error)
        })
        .await
        {
            warn!("Could not flag contact {contact_id} as sync error: {e}");
        }
        record(
            self.store.as_ref(),
            SyncLogEntry::new(
                SyncOperation::Sync,
                LogStatus::Error,
                format!("Fish sync failed: {error}"),
            )
            .contact(contact_id)
            .crm(contact.crm_id.as_deref())
            .details(json!({ "direction": direction, "error": error.to_string() })),
        )
        .await;
        AppError::Crm(error)
    }

    async fn push(&self, config: &SyncConfig, contact: Contact) -> Result<SyncOutcome, AppError> {
        let endpoint = CrmEndpoint::from(config);
        let payload = Self::payload(&contact, config);
        let response = match &contact.crm_id {
            Some(crm_id) => self.crm.update_contact(&endpoint, crm_id, &payload).await,
            None => self.crm.create_contact(&endpoint, &payload).await,
        };
        let remote = match response {
            Ok(remote) => remote,
            Err(e) => {
                return Err(self
                    .remote_failure(&contact, SyncDirection::ToRemote, e)
                    .await)
            }
        };

        let now = Utc::now();
        let updated = update_contact(self.store.as_ref(), contact.id, None, |c| {
            if c.crm_id.is_none() {
                c.crm_id = Some(remote.id.clone());
            }
            c.crm_sync_status = Some(CrmSyncStatus::Synced);
            c.crm_last_sync = Some(now);
        })
        .await?;

        record(
            self.store.as_ref(),
            SyncLogEntry::new(SyncOperation::Sync, LogStatus::Success, "Contact pushed to Fish")
                .contact(updated.id)
                .crm(updated.crm_id.as_deref())
                .details(json!({ "direction": SyncDirection::ToRemote })),
        )
        .await;
        info!("Pushed contact {} to Fish as {}", updated.id, remote.id);
        Ok(SyncOutcome::synced(&updated, "Contact pushed to Fish"))
    }

    async fn fetch_remote(&self, config: &SyncConfig, contact: &Contact) -> Result<RemoteContact, AppError> {
        let crm_id = contact.crm_id.as_deref().ok_or_else(|| {
            AppError::Validation(format!("Contact {} is not linked to Fish", contact.id))
        })?;
        match self.crm.get_contact(&CrmEndpoint::from(config), crm_id).await {
            Ok(remote) => Ok(remote),
            Err(e) => Err(self
                .remote_failure(contact, SyncDirection::FromRemote, e)
                .await),
        }
    }

    async fn pull(
        &self,
        config: &SyncConfig,
        contact: Contact,
        force_sync: bool,
    ) -> Result<SyncOutcome, AppError> {
        let remote = self.fetch_remote(config, &contact).await?;

        if !force_sync {
            if let Some(fields) = detect_conflict(&contact, &remote) {
                match config.conflict_resolution {
                    ConflictPolicy::Manual => {
                        record(
                            self.store.as_ref(),
                            SyncLogEntry::new(
                                SyncOperation::Sync,
                                LogStatus::Warning,
                                "Conflict detected between local and Fish versions",
                            )
                            .contact(contact.id)
                            .crm(Some(&remote.id))
                            .details(json!({
                                "conflict": true,
                                "direction": SyncDirection::FromRemote,
                                "conflictFields": fields,
                                "localData": ConflictSnapshot::from_local(&contact),
                                "remoteData": ConflictSnapshot::from_remote(&remote),
                            })),
                        )
                        .await;
                        warn!("Conflict on contact {} left for manual resolution", contact.id);
                        return Ok(SyncOutcome {
                            contact_id: contact.id,
                            status: SyncOutcomeStatus::Conflict,
                            crm_id: Some(remote.id),
                            conflict_fields: fields,
                            message: "Conflict detected; manual resolution required".into(),
                        });
                    }
                    ConflictPolicy::LocalWins => {
                        self.log_auto_resolution(&contact, &remote.id, "local_wins", &fields)
                            .await;
                        return self.push(config, contact).await;
                    }
                    ConflictPolicy::CrmWins => {
                        self.log_auto_resolution(&contact, &remote.id, "crm_wins", &fields)
                            .await;
                    }
                }
            }
        }

        let map_custom_fields = config.features.custom_field_mapping;
        let now = Utc::now();
        let updated = update_contact(self.store.as_ref(), contact.id, None, |c| {
            apply_remote(c, &remote, map_custom_fields);
            c.crm_sync_status = Some(CrmSyncStatus::Synced);
            c.crm_last_sync = Some(now);
        })
        .await?;

        record(
            self.store.as_ref(),
            SyncLogEntry::new(SyncOperation::Sync, LogStatus::Success, "Contact pulled from Fish")
                .contact(updated.id)
                .crm(Some(&remote.id))
                .details(json!({ "direction": SyncDirection::FromRemote })),
        )
        .await;
        Ok(SyncOutcome::synced(&updated, "Contact pulled from Fish"))
    }

    async fn log_auto_resolution(
        &self,
        contact: &Contact,
        crm_id: &str,
        policy: &str,
        fields: &[String],
    ) {
        record(
            self.store.as_ref(),
            SyncLogEntry::new(
                SyncOperation::ConflictResolution,
                LogStatus::Success,
                format!("Conflict auto-resolved by {policy} policy"),
            )
            .contact(contact.id)
            .crm(Some(crm_id))
            .details(json!({ "policy": policy, "conflictFields": fields })),
        )
        .await;
    }

    /// Syncs many contacts in sequential batches. Per-contact failures are
    /// tallied, never returned; one summary entry is logged per call.
    pub async fn bulk_sync(&self, options: BulkSyncOptions) -> Result<BulkSyncSummary, AppError> {
        let config = self.require_config().await?;
        if !config.features.bulk_operations {
            return Err(AppError::Validation("Bulk operations are disabled".into()));
        }
        if options.direction == SyncDirection::Bidirectional && !config.features.bidirectional_sync
        {
            return Err(AppError::Validation(
                "Bidirectional sync is disabled".into(),
            ));
        }

        let batch_size = options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);
        let ids = match options.contact_ids {
            Some(ids) => ids,
            None => self
                .store
                .list_contacts()
                .await?
                .into_iter()
                .filter(|c| {
                    c.crm_id.is_none() || c.crm_sync_status == Some(CrmSyncStatus::Error)
                })
                .take(AUTO_SELECT_LIMIT)
                .map(|c| c.id)
                .collect::<Vec<_>>(),
        };

        let mut summary = BulkSyncSummary {
            total: ids.len(),
            ..Default::default()
        };
        let sync_options = SyncOptions::new(options.direction);

        for (index, batch) in ids.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }
            let results = join_all(
                batch
                    .iter()
                    .map(|id| self.sync_contact(*id, sync_options)),
            )
            .await;
            for result in results {
                match result {
                    Ok(outcome) => match outcome.status {
                        SyncOutcomeStatus::Synced => summary.success += 1,
                        SyncOutcomeStatus::Conflict => summary.conflicts += 1,
                        SyncOutcomeStatus::Failed => summary.errors += 1,
                    },
                    Err(_) => summary.errors += 1,
                }
            }
        }

        let status = if summary.errors > 0 {
            LogStatus::Error
        } else if summary.conflicts > 0 {
            LogStatus::Warning
        } else {
            LogStatus::Success
        };
        record(
            self.store.as_ref(),
            SyncLogEntry::new(
                SyncOperation::BulkSync,
                status,
                format!(
                    "Bulk sync completed: {} succeeded, {} failed, {} conflicts",
                    summary.success, summary.errors, summary.conflicts
                ),
            )
            .details(json!({
                "direction": options.direction,
                "batchSize": batch_size,
                "total": summary.total,
                "success": summary.success,
                "errors": summary.errors,
                "conflicts": summary.conflicts,
            })),
        )
        .await;
        info!(
            "Bulk sync of {} contacts: {} ok, {} failed, {} conflicts",
            summary.total, summary.success, summary.errors, summary.conflicts
        );
        Ok(summary)
    }

    /// Open conflicts, rebuilt from the most recent log entries.
    pub async fn get_conflicts(&self) -> Result<Vec<ConflictRecord>, AppError> {
        let entries = self.store.recent_logs(ANALYTICS_WINDOW).await?;
        Ok(reconstruct_conflicts(&entries))
    }

    pub async fn resolve_conflict(
        &self,
        contact_id: Uuid,
        crm_id: &str,
        resolution: ConflictResolution,
    ) -> Result<SyncOutcome, AppError> {
        let config = self.require_config().await?;
        let contact = self
            .store
            .get_contact(contact_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Contact {contact_id} not found")))?;
        if contact.crm_id.as_deref() != Some(crm_id) {
            return Err(AppError::Validation(format!(
                "Contact {contact_id} is not linked to Fish contact {crm_id}"
            )));
        }

        let result = match resolution {
            ConflictResolution::UseLocal => {
                self.sync_contact(contact_id, SyncOptions::new(SyncDirection::ToRemote).forced())
                    .await
            }
            ConflictResolution::UseRemote => {
                self.sync_contact(contact_id, SyncOptions::new(SyncDirection::FromRemote).forced())
                    .await
            }
            ConflictResolution::Merge => self.merge_and_push(&config, contact).await,
        };

        let (status, message) = match &result {
            Ok(_) => (
                LogStatus::Success,
                format!("Conflict resolved with {}", resolution.as_str()),
            ),
            Err(e) => (
                LogStatus::Error,
                format!("Conflict resolution ({}) failed: {e}", resolution.as_str()),
            ),
        };
        record(
            self.store.as_ref(),
            SyncLogEntry::new(SyncOperation::ConflictResolution, status, message)
                .contact(contact_id)
                .crm(Some(crm_id))
                .details(json!({ "resolution": resolution })),
        )
        .await;
        result
    }

    async fn merge_and_push(
        &self,
        config: &SyncConfig,
        contact: Contact,
    ) -> Result<SyncOutcome, AppError> {
        let remote = self.fetch_remote(config, &contact).await?;
        let merged = update_contact(self.store.as_ref(), contact.id, None, |c| {
            merge_for_resolution(c, &remote)
        })
        .await?;
        self.push(config, merged).await
    }

    pub async fn test_connection(&self) -> Result<ConnectionStatus, AppError> {
        let config = self.require_config().await?;
        let status = match self.crm.ping(&CrmEndpoint::from(&config)).await {
            Ok(()) => ConnectionStatus {
                connected: true,
                message: "Connection to Fish verified".into(),
            },
            Err(e) => ConnectionStatus {
                connected: false,
                message: format!("Connection to Fish failed: {e}"),
            },
        };
        record(
            self.store.as_ref(),
            SyncLogEntry::new(
                SyncOperation::Sync,
                if status.connected {
                    LogStatus::Success
                } else {
                    LogStatus::Error
                },
                status.message.clone(),
            )
            .details(json!({ "check": "connection" })),
        )
        .await;
        Ok(status)
    }

    pub async fn list_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, AppError> {
        Ok(self.store.recent_logs(limit.clamp(1, MAX_LOG_LIMIT)).await?)
    }

    pub async fn stats(&self) -> Result<SyncStats, AppError> {
        let entries = self.store.recent_logs(ANALYTICS_WINDOW).await?;
        let open_conflicts = reconstruct_conflicts(&entries).len();
        Ok(compute_stats(&entries, open_conflicts))
    }
}
