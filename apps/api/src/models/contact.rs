use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    Client,
    Interpreter,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::Client => "client",
            ContactType::Interpreter => "interpreter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Pending,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    WebsiteForm,
    InterpreterApplication,
    Manual,
    Import,
    CrmIntegration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmSyncStatus {
    Synced,
    Pending,
    Error,
}

/// Unified record for a client or an interpreter.
///
/// `version` is bumped on every write and guards compare-and-swap updates.
/// `dedup_key` is unique across the store when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    pub status: ContactStatus,
    pub source: ContactSource,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    // client attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_requests: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_spent: Option<f64>,

    // interpreter attributes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specializations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_jobs: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_sync_status: Option<CrmSyncStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_last_sync: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<DateTime<Utc>>,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl Contact {
    /// Most recent local modification time.
    pub fn modified_at(&self) -> DateTime<Utc> {
        match self.last_contact {
            Some(last) if last > self.created_at => last,
            _ => self.created_at,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn custom_field_str(&self, key: &str) -> Option<&str> {
        self.custom_fields.get(key).and_then(|v| v.as_str())
    }
}

/// Fields accepted when creating a contact. Identity, timestamps and
/// CRM linkage are assigned by the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[serde(default = "default_status")]
    pub status: ContactStatus,
    #[serde(default = "default_source")]
    pub source: ContactSource,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    pub notes: Option<String>,
    pub service_requests: Option<i64>,
    pub total_spent: Option<f64>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
    pub rating: Option<f64>,
    pub completed_jobs: Option<i64>,
}

fn default_status() -> ContactStatus {
    ContactStatus::Pending
}

fn default_source() -> ContactSource {
    ContactSource::Manual
}

impl NewContact {
    pub fn new(contact_type: ContactType, name: &str, email: &str, source: ContactSource) -> Self {
        Self {
            contact_type,
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
            company: None,
            status: ContactStatus::Pending,
            source,
            tags: Vec::new(),
            custom_fields: Map::new(),
            notes: None,
            service_requests: None,
            total_spent: None,
            languages: Vec::new(),
            specializations: Vec::new(),
            rating: None,
            completed_jobs: None,
        }
    }

    pub fn into_contact(self, now: DateTime<Utc>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            contact_type: self.contact_type,
            name: self.name,
            email: self.email,
            phone: self.phone,
            company: self.company,
            status: self.status,
            source: self.source,
            tags: self.tags,
            custom_fields: self.custom_fields,
            notes: self.notes,
            service_requests: self.service_requests,
            total_spent: self.total_spent,
            languages: self.languages,
            specializations: self.specializations,
            rating: self.rating,
            completed_jobs: self.completed_jobs,
            crm_id: None,
            crm_sync_status: None,
            crm_last_sync: None,
            created_at: now,
            last_contact: None,
            version: 1,
            dedup_key: None,
        }
    }
}

/// Partial update. `None` leaves a field untouched; `type`, `source` and
/// `createdAt` cannot be patched. `phone`, `company` and `notes` are cleared
/// by an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub company: Option<Option<String>>,
    pub status: Option<ContactStatus>,
    pub tags: Option<Vec<String>>,
    pub custom_fields: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
    pub service_requests: Option<i64>,
    pub total_spent: Option<f64>,
    pub languages: Option<Vec<String>>,
    pub specializations: Option<Vec<String>>,
    pub rating: Option<f64>,
    pub completed_jobs: Option<i64>,
    pub crm_id: Option<String>,
    pub crm_sync_status: Option<CrmSyncStatus>,
    pub crm_last_sync: Option<DateTime<Utc>>,
}

/// Present-but-null becomes `Some(None)`; an absent key stays `None` via `default`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ContactPatch {
    /// Merges the patch into `contact`. `customFields` entries are merged
    /// key by key; every other field is replaced wholesale.
    pub fn apply(self, contact: &mut Contact) {
        if let Some(v) = self.name {
            contact.name = v;
        }
        if let Some(v) = self.email {
            contact.email = v;
        }
        if let Some(v) = self.phone {
            contact.phone = v;
        }
        if let Some(v) = self.company {
            contact.company = v;
        }
        if let Some(v) = self.status {
            contact.status = v;
        }
        if let Some(v) = self.tags {
            contact.tags = v;
        }
        if let Some(fields) = self.custom_fields {
            for (key, value) in fields {
                if value.is_null() {
                    contact.custom_fields.remove(&key);
                } else {
                    contact.custom_fields.insert(key, value);
                }
            }
        }
        if let Some(v) = self.notes {
            contact.notes = v;
        }
        if let Some(v) = self.service_requests {
            contact.service_requests = Some(v);
        }
        if let Some(v) = self.total_spent {
            contact.total_spent = Some(v);
        }
        if let Some(v) = self.languages {
            contact.languages = v;
        }
        if let Some(v) = self.specializations {
            contact.specializations = v;
        }
        if let Some(v) = self.rating {
            contact.rating = Some(v);
        }
        if let Some(v) = self.completed_jobs {
            contact.completed_jobs = Some(v);
        }
        if let Some(v) = self.crm_id {
            contact.crm_id = Some(v);
        }
        if let Some(v) = self.crm_sync_status {
            contact.crm_sync_status = Some(v);
        }
        if let Some(v) = self.crm_last_sync {
            contact.crm_last_sync = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample() -> Contact {
        NewContact::new(
            ContactType::Client,
            "Ana",
            "ana@x.com",
            ContactSource::Manual,
        )
        .into_contact(Utc::now())
    }

    #[test]
    fn test_modified_at_prefers_later_last_contact() {
        let mut c = sample();
        assert_eq!(c.modified_at(), c.created_at);
        let later = c.created_at + Duration::minutes(3);
        c.last_contact = Some(later);
        assert_eq!(c.modified_at(), later);
    }

    #[test]
    fn test_patch_merges_custom_fields_by_key() {
        let mut c = sample();
        c.custom_fields.insert("Priority".into(), json!("High"));
        c.custom_fields.insert("Region".into(), json!("EU"));

        let mut fields = Map::new();
        fields.insert("Priority".into(), json!("Low"));
        fields.insert("Region".into(), Value::Null);
        let patch = ContactPatch {
            custom_fields: Some(fields),
            name: Some("Ana Maria".into()),
            ..Default::default()
        };
        patch.apply(&mut c);

        assert_eq!(c.name, "Ana Maria");
        assert_eq!(c.custom_fields.get("Priority"), Some(&json!("Low")));
        assert!(!c.custom_fields.contains_key("Region"));
        assert_eq!(c.email, "ana@x.com");
    }

    #[test]
    fn test_patch_null_clears_optional_text() {
        let mut c = sample();
        c.phone = Some("+34 600 000 000".into());
        c.company = Some("Acme".into());
        c.notes = Some("Call after 5".into());

        let patch: ContactPatch =
            serde_json::from_value(json!({ "phone": null, "notes": null })).unwrap();
        patch.apply(&mut c);

        assert!(c.phone.is_none());
        assert!(c.notes.is_none());
        assert_eq!(c.company.as_deref(), Some("Acme"));

        let patch: ContactPatch = serde_json::from_value(json!({ "company": "Globex" })).unwrap();
        patch.apply(&mut c);
        assert_eq!(c.company.as_deref(), Some("Globex"));
    }

    #[test]
    fn test_contact_serializes_camel_case_with_type_key() {
        let c = sample();
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "client");
        assert_eq!(v["status"], "pending");
        assert!(v.get("customFields").is_some());
        assert!(v.get("crmId").is_none());
    }

    #[test]
    fn test_add_tag_is_idempotent() {
        let mut c = sample();
        c.add_tag("vip");
        c.add_tag("vip");
        assert_eq!(c.tags, vec!["vip".to_string()]);
    }
}
