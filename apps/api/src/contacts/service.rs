use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::contact::{Contact, ContactPatch, ContactType, CrmSyncStatus, NewContact};
use crate::store::Store;
use crate::sync::SyncEngine;

/// Attempts at a read-merge-write cycle before giving up on a busy contact.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Read-merge-write with compare-and-swap on `version`.
///
/// With `expected_version` set, a stale caller gets `AppError::Conflict`.
/// Without it, a lost race re-reads and re-applies `mutate`.
/// Every successful write bumps `version` and stamps `lastContact`.
pub async fn update_contact<F>(
    store: &dyn Store,
    id: Uuid,
    expected_version: Option<i64>,
    mut mutate: F,
) -> Result<Contact, AppError>
where
    F: FnMut(&mut Contact) + Send,
{
    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let current = store
            .get_contact(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Contact {id} not found")))?;

        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(AppError::Conflict(format!(
                    "Contact {id} is at version {}, expected {expected}",
                    current.version
                )));
            }
        }

        let mut next = current.clone();
        mutate(&mut next);
        // immutable after creation
        next.id = current.id;
        next.contact_type = current.contact_type;
        next.source = current.source;
        next.created_at = current.created_at;
        next.dedup_key = current.dedup_key.clone();
        next.version = current.version + 1;
        next.last_contact = Some(Utc::now());

        if store.replace_contact(&next, current.version).await? {
            return Ok(next);
        }
        if expected_version.is_some() {
            return Err(AppError::Conflict(format!(
                "Contact {id} was modified concurrently"
            )));
        }
        debug!("Contact {id} changed underneath update (attempt {attempt}), retrying");
    }

    Err(AppError::Conflict(format!(
        "Contact {id} kept changing; gave up after {MAX_UPDATE_ATTEMPTS} attempts"
    )))
}

/// Contact Store operations. Creation pushes to Fish when sync is enabled;
/// a failed push never fails the create.
#[derive(Clone)]
pub struct ContactService {
    store: Arc<dyn Store>,
    engine: Arc<SyncEngine>,
}

impl ContactService {
    pub fn new(store: Arc<dyn Store>, engine: Arc<SyncEngine>) -> Self {
        Self { store, engine }
    }

    pub async fn create(&self, new: NewContact) -> Result<Contact, AppError> {
        validate_identity(&new)?;
        if let Some(existing) = self.find_by_email(&new.email, new.contact_type).await? {
            return Err(AppError::Validation(format!(
                "A {} with email {} already exists ({})",
                new.contact_type.as_str(),
                new.email,
                existing.id
            )));
        }

        let contact = self.prepare(new).await;
        self.store.insert_contact(&contact).await?;
        info!("Created {} contact {}", contact.contact_type.as_str(), contact.id);
        self.after_create(contact).await
    }

    /// Creates a contact guarded by a storage-level unique `dedup_key`.
    /// Returns `None` when another writer already used the key.
    pub async fn create_deduplicated(
        &self,
        new: NewContact,
        dedup_key: String,
    ) -> Result<Option<Contact>, AppError> {
        validate_identity(&new)?;
        let mut contact = self.prepare(new).await;
        contact.dedup_key = Some(dedup_key);

        if !self.store.insert_contact(&contact).await? {
            debug!(
                "Dedup key {:?} already taken, skipping create",
                contact.dedup_key
            );
            return Ok(None);
        }
        info!("Created {} contact {}", contact.contact_type.as_str(), contact.id);
        self.after_create(contact).await.map(Some)
    }

    pub async fn list(&self) -> Result<Vec<Contact>, AppError> {
        Ok(self.store.list_contacts().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Contact, AppError> {
        self.store
            .get_contact(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Contact {id} not found")))
    }

    pub async fn get_by_type(&self, contact_type: ContactType) -> Result<Vec<Contact>, AppError> {
        Ok(self.store.list_contacts_by_type(contact_type).await?)
    }

    pub async fn update(
        &self,
        id: Uuid,
        patch: ContactPatch,
        expected_version: Option<i64>,
    ) -> Result<Contact, AppError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::Validation("Name cannot be empty".into()));
        }
        if patch.email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err(AppError::Validation("Email is invalid".into()));
        }
        update_contact(self.store.as_ref(), id, expected_version, |c| {
            patch.clone().apply(c)
        })
        .await
    }

    /// Best-effort `(email, type)` lookup. Not a uniqueness guarantee.
    pub async fn find_by_email(
        &self,
        email: &str,
        contact_type: ContactType,
    ) -> Result<Option<Contact>, AppError> {
        Ok(self
            .store
            .list_contacts_by_type(contact_type)
            .await?
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email.trim())))
    }

    async fn prepare(&self, new: NewContact) -> Contact {
        let mut contact = new.into_contact(Utc::now());
        if self.engine.push_enabled().await {
            contact.crm_sync_status = Some(CrmSyncStatus::Pending);
        }
        contact
    }

    async fn after_create(&self, contact: Contact) -> Result<Contact, AppError> {
        if contact.crm_sync_status != Some(CrmSyncStatus::Pending) {
            return Ok(contact);
        }
        if let Some(outcome) = self.engine.push_new_contact(contact.id).await {
            if outcome.is_failed() {
                warn!("Fish push for new contact {} failed: {}", contact.id, outcome.message);
            }
        }
        // re-read to pick up CRM linkage written by the push
        Ok(self.store.get_contact(contact.id).await?.unwrap_or(contact))
    }
}

fn validate_identity(new: &NewContact) -> Result<(), AppError> {
    if new.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".into()));
    }
    if new.email.trim().is_empty() || !new.email.contains('@') {
        return Err(AppError::Validation("A valid email is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contact::ContactSource;
    use crate::models::sync::{ConflictPolicy, LogStatus};
    use crate::state::testing::{configured_state, state};

    fn new_client(name: &str, email: &str) -> NewContact {
        NewContact::new(ContactType::Client, name, email, ContactSource::Manual)
    }

    #[tokio::test]
    async fn test_create_without_config_stays_local() {
        let (state, crm) = state();

        let contact = state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();

        assert_eq!(contact.version, 1);
        assert!(contact.crm_sync_status.is_none());
        assert!(crm.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_pushes_when_sync_enabled() {
        let (state, _crm) = configured_state(ConflictPolicy::Manual).await;

        let contact = state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();

        assert_eq!(contact.crm_id.as_deref(), Some("fish-1"));
        assert_eq!(contact.crm_sync_status, Some(CrmSyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_failed_push_does_not_fail_create() {
        let (state, crm) = configured_state(ConflictPolicy::Manual).await;
        crm.fail_email("ana@example.com").await;

        let contact = state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();

        assert_eq!(contact.crm_sync_status, Some(CrmSyncStatus::Error));
        assert!(contact.crm_id.is_none());

        let logs = state.store.recent_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Error);
        assert_eq!(logs[0].contact_id, Some(contact.id));
    }

    #[tokio::test]
    async fn test_create_rejects_missing_identity() {
        let (state, _crm) = state();

        let err = state
            .contacts
            .create(new_client("  ", "ana@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = state
            .contacts
            .create(new_client("Ana", "not-an-email"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_same_email_and_type() {
        let (state, _crm) = state();
        state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();

        let err = state
            .contacts
            .create(new_client("Ana L.", "ANA@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // same email as an interpreter is a different contact
        let interpreter = NewContact::new(
            ContactType::Interpreter,
            "Ana Lopez",
            "ana@example.com",
            ContactSource::Manual,
        );
        assert!(state.contacts.create(interpreter).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_deduplicated_returns_none_on_reuse() {
        let (state, _crm) = state();

        let first = state
            .contacts
            .create_deduplicated(new_client("Ana", "ana@example.com"), "client_request:r1".into())
            .await
            .unwrap();
        let second = state
            .contacts
            .create_deduplicated(new_client("Ana", "ana2@example.com"), "client_request:r1".into())
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(state.contacts.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_immutables() {
        let (state, _crm) = state();
        let contact = state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();

        let patch = ContactPatch {
            company: Some(Some("Acme".into())),
            ..Default::default()
        };
        let updated = state
            .contacts
            .update(contact.id, patch, Some(contact.version))
            .await
            .unwrap();

        assert_eq!(updated.version, contact.version + 1);
        assert_eq!(updated.company.as_deref(), Some("Acme"));
        assert_eq!(updated.created_at, contact.created_at);
        assert_eq!(updated.contact_type, contact.contact_type);
        assert!(updated.last_contact.is_some());
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let (state, _crm) = state();
        let contact = state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();
        state
            .contacts
            .update(contact.id, ContactPatch::default(), None)
            .await
            .unwrap();

        let err = state
            .contacts
            .update(contact.id, ContactPatch::default(), Some(contact.version))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let (state, _crm) = state();
        let contact = state
            .contacts
            .create(new_client("Ana Lopez", "ana@example.com"))
            .await
            .unwrap();

        let store = state.store.clone();
        let first = update_contact(store.as_ref(), contact.id, None, |c| c.add_tag("vip"));
        let second = update_contact(store.as_ref(), contact.id, None, |c| c.add_tag("spanish"));
        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        let stored = state.contacts.get(contact.id).await.unwrap();
        assert!(stored.has_tag("vip"));
        assert!(stored.has_tag("spanish"));
        assert_eq!(stored.version, contact.version + 2);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (state, _crm) = state();
        let err = state.contacts.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
