//! Persistence seam for the document collections the sync core works on:
//! contacts, custom field definitions, raw submissions, the sync log and the
//! singleton sync config.
//!
//! `PgStore` is the production backend; `MemoryStore` backs local runs and tests.
//! Handlers and services only ever see `Arc<dyn Store>`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::contact::{Contact, ContactType};
use crate::models::custom_field::CustomField;
use crate::models::submission::{Submission, SubmissionKind};
use crate::models::sync::{SyncConfig, SyncLogEntry};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Capacity of the live submission feed. Lagging subscribers fall back to the re-scan.
pub(crate) const SUBMISSION_FEED_CAPACITY: usize = 256;

#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a contact. Returns `false` without writing when the contact's
    /// `dedup_key` is already taken.
    async fn insert_contact(&self, contact: &Contact) -> Result<bool>;

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>>;

    async fn find_contact_by_crm_id(&self, crm_id: &str) -> Result<Option<Contact>>;

    /// All contacts, newest first.
    async fn list_contacts(&self) -> Result<Vec<Contact>>;

    /// Contacts of one type, newest first.
    async fn list_contacts_by_type(&self, contact_type: ContactType) -> Result<Vec<Contact>>;

    /// Compare-and-swap write. `contact.version` must already carry the new
    /// version; the write only lands if the stored version is `expected_version`.
    async fn replace_contact(&self, contact: &Contact, expected_version: i64) -> Result<bool>;

    async fn insert_custom_field(&self, field: &CustomField) -> Result<()>;

    async fn get_custom_field(&self, id: Uuid) -> Result<Option<CustomField>>;

    /// Every definition, deleted ones included, oldest first.
    async fn list_custom_fields(&self) -> Result<Vec<CustomField>>;

    async fn replace_custom_field(&self, field: &CustomField) -> Result<()>;

    /// Removes the field's key from every contact and flags the definition
    /// deleted, atomically. Returns how many contacts lost the key.
    async fn delete_custom_field(&self, id: Uuid, deleted_at: DateTime<Utc>) -> Result<usize>;

    async fn insert_submission(&self, submission: &Submission) -> Result<()>;

    /// Unprocessed submissions of one kind, oldest first.
    async fn list_unprocessed(&self, kind: SubmissionKind) -> Result<Vec<Submission>>;

    /// Flags a submission processed. Returns `false` if it already was.
    async fn mark_processed(
        &self,
        id: Uuid,
        processed_by: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Live feed of submissions inserted through this store handle.
    fn subscribe_submissions(&self) -> broadcast::Receiver<Submission>;

    async fn append_log(&self, entry: &SyncLogEntry) -> Result<()>;

    /// Most recent log entries, newest first.
    async fn recent_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>>;

    async fn get_sync_config(&self) -> Result<Option<SyncConfig>>;

    async fn put_sync_config(&self, config: &SyncConfig) -> Result<()>;
}
