//! In-process Fish stand-in for tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{ContactPayload, CrmApi, CrmEndpoint, CrmError, RemoteContact};

#[derive(Default)]
struct FakeState {
    contacts: HashMap<String, RemoteContact>,
    next_id: u32,
    failing_emails: HashSet<String>,
    down: bool,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeCrm {
    state: Mutex<FakeState>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or overwrites a remote record.
    pub async fn put_remote(&self, contact: RemoteContact) {
        self.state
            .lock()
            .await
            .contacts
            .insert(contact.id.clone(), contact);
    }

    pub async fn remote(&self, crm_id: &str) -> Option<RemoteContact> {
        self.state.lock().await.contacts.get(crm_id).cloned()
    }

    /// Pushes for this email answer 422.
    pub async fn fail_email(&self, email: &str) {
        self.state
            .lock()
            .await
            .failing_emails
            .insert(email.to_string());
    }

    /// Every call answers 503 while down.
    pub async fn set_down(&self, down: bool) {
        self.state.lock().await.down = down;
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    fn unavailable() -> CrmError {
        CrmError::Api {
            status: 503,
            message: "Service unavailable".into(),
        }
    }

    fn store_payload(id: &str, payload: &ContactPayload) -> RemoteContact {
        RemoteContact {
            id: id.to_string(),
            name: payload.name.clone(),
            email: payload.email.clone(),
            phone: payload.phone.clone(),
            company: payload.company.clone(),
            contact_type: Some(payload.contact_type),
            status: Some(payload.status),
            tags: payload.tags.clone(),
            custom_fields: payload.custom_fields.clone().unwrap_or_default(),
            notes: None,
            external_id: Some(payload.external_id.clone()),
            source: Some(payload.source.clone()),
            updated_at: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl CrmApi for FakeCrm {
    async fn create_contact(
        &self,
        _endpoint: &CrmEndpoint,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, CrmError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("POST {}", payload.email));
        if state.down {
            return Err(Self::unavailable());
        }
        if state.failing_emails.contains(&payload.email) {
            return Err(CrmError::Api {
                status: 422,
                message: format!("Rejected {}", payload.email),
            });
        }
        state.next_id += 1;
        let id = format!("fish-{}", state.next_id);
        let remote = Self::store_payload(&id, payload);
        state.contacts.insert(id, remote.clone());
        Ok(remote)
    }

    async fn update_contact(
        &self,
        _endpoint: &CrmEndpoint,
        crm_id: &str,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, CrmError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("PUT {crm_id}"));
        if state.down {
            return Err(Self::unavailable());
        }
        if !state.contacts.contains_key(crm_id) {
            return Err(CrmError::Api {
                status: 404,
                message: format!("Contact {crm_id} not found"),
            });
        }
        let remote = Self::store_payload(crm_id, payload);
        state.contacts.insert(crm_id.to_string(), remote.clone());
        Ok(remote)
    }

    async fn get_contact(
        &self,
        _endpoint: &CrmEndpoint,
        crm_id: &str,
    ) -> Result<RemoteContact, CrmError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("GET {crm_id}"));
        if state.down {
            return Err(Self::unavailable());
        }
        state
            .contacts
            .get(crm_id)
            .cloned()
            .ok_or_else(|| CrmError::Api {
                status: 404,
                message: format!("Contact {crm_id} not found"),
            })
    }

    async fn ping(&self, _endpoint: &CrmEndpoint) -> Result<(), CrmError> {
        if self.state.lock().await.down {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}
