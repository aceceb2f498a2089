//! Fish CRM client: the single point of entry for all calls to the external CRM.
//!
//! Nothing else in the crate talks HTTP to Fish. Sync code depends on the
//! `CrmApi` trait so tests can swap in an in-process fake.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::contact::{ContactStatus, ContactType};
use crate::models::sync::SyncConfig;

#[cfg(test)]
pub mod fake;

/// Pinned Fish API version sent with every request.
pub const FISH_API_VERSION: &str = "2024-01-01";
/// Marker placed in the `source` field of every pushed contact.
pub const PUSH_SOURCE: &str = "lingua-portal";

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fish API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Fish API request timed out")]
    Timeout,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where and as whom to call Fish. Derived from the stored `SyncConfig`.
#[derive(Debug, Clone)]
pub struct CrmEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl From<&SyncConfig> for CrmEndpoint {
    fn from(config: &SyncConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

/// A contact as Fish reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContact {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default, rename = "type")]
    pub contact_type: Option<ContactType>,
    #[serde(default)]
    pub status: Option<ContactStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of `POST /contacts` and `PUT /contacts/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub status: ContactStatus,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
    pub external_id: String,
    pub source: String,
}

#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn create_contact(
        &self,
        endpoint: &CrmEndpoint,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, CrmError>;

    async fn update_contact(
        &self,
        endpoint: &CrmEndpoint,
        crm_id: &str,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, CrmError>;

    async fn get_contact(
        &self,
        endpoint: &CrmEndpoint,
        crm_id: &str,
    ) -> Result<RemoteContact, CrmError>;

    /// Cheapest authenticated call, used to test credentials.
    async fn ping(&self, endpoint: &CrmEndpoint) -> Result<(), CrmError>;
}

#[derive(Debug, Deserialize)]
struct FishErrorBody {
    message: String,
}

/// reqwest-backed Fish client. Every request carries the configured timeout.
#[derive(Clone)]
pub struct FishClient {
    client: Client,
}

impl FishClient {
    pub fn new(timeout: Duration) -> Result<Self, CrmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn authorized(&self, builder: RequestBuilder, endpoint: &CrmEndpoint) -> RequestBuilder {
        builder
            .bearer_auth(&endpoint.api_key)
            .header("X-Fish-API-Version", FISH_API_VERSION)
            .header("content-type", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CrmError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CrmError::Timeout
            } else {
                CrmError::Http(e)
            }
        })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<FishErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(CrmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Fish call succeeded with status {status}");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl CrmApi for FishClient {
    async fn create_contact(
        &self,
        endpoint: &CrmEndpoint,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, CrmError> {
        let url = format!("{}/contacts", endpoint.base_url);
        self.send(self.authorized(self.client.post(url), endpoint).json(payload))
            .await
    }

    async fn update_contact(
        &self,
        endpoint: &CrmEndpoint,
        crm_id: &str,
        payload: &ContactPayload,
    ) -> Result<RemoteContact, CrmError> {
        let url = format!("{}/contacts/{}", endpoint.base_url, crm_id);
        self.send(self.authorized(self.client.put(url), endpoint).json(payload))
            .await
    }

    async fn get_contact(
        &self,
        endpoint: &CrmEndpoint,
        crm_id: &str,
    ) -> Result<RemoteContact, CrmError> {
        let url = format!("{}/contacts/{}", endpoint.base_url, crm_id);
        self.send(self.authorized(self.client.get(url), endpoint))
            .await
    }

    async fn ping(&self, endpoint: &CrmEndpoint) -> Result<(), CrmError> {
        let url = format!("{}/contacts", endpoint.base_url);
        let _: Value = self
            .send(
                self.authorized(self.client.get(url), endpoint)
                    .query(&[("limit", "1")]),
            )
            .await?;
        Ok(())
    }
}
