use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{Store, SUBMISSION_FEED_CAPACITY};
use crate::models::contact::{Contact, ContactType};
use crate::models::custom_field::CustomField;
use crate::models::submission::{Submission, SubmissionKind};
use crate::models::sync::{SyncConfig, SyncLogEntry};

#[derive(Default)]
struct Collections {
    contacts: HashMap<Uuid, Contact>,
    custom_fields: HashMap<Uuid, CustomField>,
    submissions: HashMap<Uuid, Submission>,
    logs: Vec<SyncLogEntry>,
    config: Option<SyncConfig>,
}

/// In-process store. Every multi-document operation runs under one write lock,
/// which gives it the same atomicity as the Postgres transactions.
pub struct MemoryStore {
    inner: RwLock<Collections>,
    submissions_tx: broadcast::Sender<Submission>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (submissions_tx, _) = broadcast::channel(SUBMISSION_FEED_CAPACITY);
        Self {
            inner: RwLock::new(Collections::default()),
            submissions_tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut contacts: Vec<Contact>) -> Vec<Contact> {
    contacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    contacts
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_contact(&self, contact: &Contact) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if let Some(key) = &contact.dedup_key {
            if inner
                .contacts
                .values()
                .any(|c| c.dedup_key.as_ref() == Some(key))
            {
                return Ok(false);
            }
        }
        inner.contacts.insert(contact.id, contact.clone());
        Ok(true)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        Ok(self.inner.read().await.contacts.get(&id).cloned())
    }

    async fn find_contact_by_crm_id(&self, crm_id: &str) -> Result<Option<Contact>> {
        let inner = self.inner.read().await;
        Ok(inner
            .contacts
            .values()
            .filter(|c| c.crm_id.as_deref() == Some(crm_id))
            .min_by_key(|c| c.created_at)
            .cloned())
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let inner = self.inner.read().await;
        Ok(newest_first(inner.contacts.values().cloned().collect()))
    }

    async fn list_contacts_by_type(&self, contact_type: ContactType) -> Result<Vec<Contact>> {
        let inner = self.inner.read().await;
        Ok(newest_first(
            inner
                .contacts
                .values()
                .filter(|c| c.contact_type == contact_type)
                .cloned()
                .collect(),
        ))
    }

    async fn replace_contact(&self, contact: &Contact, expected_version: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.contacts.get_mut(&contact.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = contact.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_custom_field(&self, field: &CustomField) -> Result<()> {
        self.inner
            .write()
            .await
            .custom_fields
            .insert(field.id, field.clone());
        Ok(())
    }

    async fn get_custom_field(&self, id: Uuid) -> Result<Option<CustomField>> {
        Ok(self.inner.read().await.custom_fields.get(&id).cloned())
    }

    async fn list_custom_fields(&self) -> Result<Vec<CustomField>> {
        let inner = self.inner.read().await;
        let mut fields: Vec<_> = inner.custom_fields.values().cloned().collect();
        fields.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(fields)
    }

    async fn replace_custom_field(&self, field: &CustomField) -> Result<()> {
        self.inner
            .write()
            .await
            .custom_fields
            .insert(field.id, field.clone());
        Ok(())
    }

    async fn delete_custom_field(&self, id: Uuid, deleted_at: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let Some(name) = inner.custom_fields.get(&id).map(|f| f.name.clone()) else {
            return Ok(0);
        };

        let mut touched = 0;
        for contact in inner.contacts.values_mut() {
            if contact.custom_fields.remove(&name).is_some() {
                contact.version += 1;
                touched += 1;
            }
        }
        if let Some(field) = inner.custom_fields.get_mut(&id) {
            field.deleted = true;
            field.deleted_at = Some(deleted_at);
        }
        Ok(touched)
    }

    async fn insert_submission(&self, submission: &Submission) -> Result<()> {
        self.inner
            .write()
            .await
            .submissions
            .insert(submission.id, submission.clone());
        // No subscribers is fine: the periodic re-scan picks it up.
        if self.submissions_tx.send(submission.clone()).is_err() {
            debug!("No live subscribers for submission {}", submission.id);
        }
        Ok(())
    }

    async fn list_unprocessed(&self, kind: SubmissionKind) -> Result<Vec<Submission>> {
        let inner = self.inner.read().await;
        let mut pending: Vec<_> = inner
            .submissions
            .values()
            .filter(|s| s.kind == kind && !s.processed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        processed_by: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.submissions.get_mut(&id) {
            Some(s) if !s.processed => {
                s.processed = true;
                s.processed_at = Some(processed_at);
                s.processed_by = Some(processed_by.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn subscribe_submissions(&self) -> broadcast::Receiver<Submission> {
        self.submissions_tx.subscribe()
    }

    async fn append_log(&self, entry: &SyncLogEntry) -> Result<()> {
        self.inner.write().await.logs.push(entry.clone());
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.logs.iter().rev().take(limit).cloned().collect())
    }

    async fn get_sync_config(&self) -> Result<Option<SyncConfig>> {
        Ok(self.inner.read().await.config.clone())
    }

    async fn put_sync_config(&self, config: &SyncConfig) -> Result<()> {
        self.inner.write().await.config = Some(config.clone());
        Ok(())
    }
}
