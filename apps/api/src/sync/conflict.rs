//! Conflict heuristics between a local contact and its Fish counterpart,
//! plus the two merge rules (pull merge and manual-resolution merge).
//!
//! Detection is a time-window check, not a causal one: edits further apart
//! than `CONFLICT_WINDOW` are never flagged.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::fish_client::RemoteContact;
use crate::models::contact::Contact;
use crate::models::sync::{LogStatus, SyncLogEntry, SyncOperation};

pub const CONFLICT_WINDOW_MINUTES: i64 = 5;

/// Identity fields compared when building the conflict list shown to admins.
const DISPLAY_FIELDS: [&str; 4] = ["name", "email", "phone", "company"];

/// Comparable view of one side of a conflict. Stored in warning log details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSnapshot {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ConflictSnapshot {
    pub fn from_local(contact: &Contact) -> Self {
        Self {
            name: contact.name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            company: contact.company.clone(),
            tags: contact.tags.clone(),
            custom_fields: contact.custom_fields.clone(),
            modified_at: Some(contact.modified_at()),
        }
    }

    pub fn from_remote(remote: &RemoteContact) -> Self {
        Self {
            name: remote.name.clone(),
            email: remote.email.clone(),
            phone: remote.phone.clone(),
            company: remote.company.clone(),
            tags: remote.tags.clone(),
            custom_fields: remote.custom_fields.clone(),
            modified_at: remote.updated_at,
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => Some(self.name.as_str()),
            "email" => Some(self.email.as_str()),
            "phone" => self.phone.as_deref(),
            "company" => self.company.as_deref(),
            _ => None,
        }
    }
}

/// A conflict awaiting manual resolution, rebuilt from the sync log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub contact_id: Uuid,
    pub crm_id: Option<String>,
    pub local_data: ConflictSnapshot,
    pub remote_data: ConflictSnapshot,
    pub conflict_fields: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

fn normalized(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_blank(value: Option<&str>) -> bool {
    normalized(value).is_none()
}

/// Returns the differing identity fields when both versions were modified
/// within the conflict window of each other. `None` means no conflict.
pub fn detect_conflict(local: &Contact, remote: &RemoteContact) -> Option<Vec<String>> {
    let remote_modified = remote.updated_at?;
    let gap = local.modified_at() - remote_modified;
    if gap.num_milliseconds().abs() > Duration::minutes(CONFLICT_WINDOW_MINUTES).num_milliseconds()
    {
        return None;
    }

    let mut fields = Vec::new();
    if normalized(Some(&local.name)) != normalized(Some(&remote.name)) {
        fields.push("name".to_string());
    }
    if normalized(Some(&local.email)) != normalized(Some(&remote.email)) {
        fields.push("email".to_string());
    }
    if normalized(local.phone.as_deref()) != normalized(remote.phone.as_deref()) {
        fields.push("phone".to_string());
    }

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

/// Identity fields that differ between two snapshots.
pub fn diff_fields(local: &ConflictSnapshot, remote: &ConflictSnapshot) -> Vec<String> {
    DISPLAY_FIELDS
        .into_iter()
        .filter(|f| normalized(local.field(f)) != normalized(remote.field(f)))
        .map(|f| f.to_string())
        .collect()
}

fn union_tags(base: &mut Vec<String>, other: &[String]) {
    for tag in other {
        if !base.contains(tag) {
            base.push(tag.clone());
        }
    }
}

/// Pull merge: remote wins every scalar it provides, tags are unioned and
/// custom fields are a keyed union with remote winning collisions.
pub fn apply_remote(contact: &mut Contact, remote: &RemoteContact, map_custom_fields: bool) {
    contact.name = remote.name.clone();
    contact.email = remote.email.clone();
    if !is_blank(remote.phone.as_deref()) {
        contact.phone = remote.phone.clone();
    }
    if !is_blank(remote.company.as_deref()) {
        contact.company = remote.company.clone();
    }
    if let Some(status) = remote.status {
        contact.status = status;
    }
    if !is_blank(remote.notes.as_deref()) {
        contact.notes = remote.notes.clone();
    }
    union_tags(&mut contact.tags, &remote.tags);
    if map_custom_fields {
        for (key, value) in &remote.custom_fields {
            contact.custom_fields.insert(key.clone(), value.clone());
        }
    }
}

/// Manual merge: local values stand unless blank, remote fills the gaps.
/// Tags are unioned; custom fields are a keyed union with local winning.
pub fn merge_for_resolution(contact: &mut Contact, remote: &RemoteContact) {
    if is_blank(Some(&contact.name)) {
        contact.name = remote.name.clone();
    }
    if is_blank(Some(&contact.email)) {
        contact.email = remote.email.clone();
    }
    if is_blank(contact.phone.as_deref()) {
        contact.phone = remote.phone.clone();
    }
    if is_blank(contact.company.as_deref()) {
        contact.company = remote.company.clone();
    }
    union_tags(&mut contact.tags, &remote.tags);
    for (key, value) in &remote.custom_fields {
        contact
            .custom_fields
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

/// Whether a log entry records a conflict left for manual resolution.
pub fn is_conflict_entry(entry: &SyncLogEntry) -> bool {
    entry.status == LogStatus::Warning
        && (entry.details.get("conflict").and_then(Value::as_bool) == Some(true)
            || entry.message.to_lowercase().contains("conflict"))
}

/// Rebuilds the open-conflict list from log entries ordered newest first.
/// A contact appears at most once (its latest conflict), and not at all once
/// a later successful resolution was logged for it.
pub fn reconstruct_conflicts(entries: &[SyncLogEntry]) -> Vec<ConflictRecord> {
    let mut closed: HashSet<Uuid> = HashSet::new();
    let mut records = Vec::new();

    for entry in entries {
        let Some(contact_id) = entry.contact_id else {
            continue;
        };
        if entry.operation == SyncOperation::ConflictResolution
            && entry.status == LogStatus::Success
        {
            closed.insert(contact_id);
            continue;
        }
        if !is_conflict_entry(entry) || closed.contains(&contact_id) {
            continue;
        }

        let local = entry
            .details
            .get("localData")
            .cloned()
            .and_then(|v| serde_json::from_value::<ConflictSnapshot>(v).ok());
        let remote = entry
            .details
            .get("remoteData")
            .cloned()
            .and_then(|v| serde_json::from_value::<ConflictSnapshot>(v).ok());
        let (Some(local_data), Some(remote_data)) = (local, remote) else {
            continue;
        };

        closed.insert(contact_id);
        records.push(ConflictRecord {
            contact_id,
            crm_id: entry.crm_id.clone(),
            conflict_fields: diff_fields(&local_data, &remote_data),
            local_data,
            remote_data,
            detected_at: entry.timestamp,
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contact::{ContactSource, ContactType, NewContact};
    use serde_json::json;

    fn local(now: DateTime<Utc>) -> Contact {
        let mut c = NewContact::new(ContactType::Client, "Ana", "ana@x.com", ContactSource::Manual)
            .into_contact(now);
        c.crm_id = Some("fish-1".into());
        c
    }

    fn remote(name: &str, email: &str, updated_at: Option<DateTime<Utc>>) -> RemoteContact {
        RemoteContact {
            id: "fish-1".into(),
            name: name.into(),
            email: email.into(),
            phone: None,
            company: None,
            contact_type: None,
            status: None,
            tags: vec![],
            custom_fields: Map::new(),
            notes: None,
            external_id: None,
            source: None,
            updated_at,
        }
    }

    #[test]
    fn test_conflict_within_window_on_email() {
        let now = Utc::now();
        let c = local(now);
        let r = remote("Ana", "ana@remote.com", Some(now + Duration::minutes(4)));
        assert_eq!(detect_conflict(&c, &r), Some(vec!["email".to_string()]));
    }

    #[test]
    fn test_no_conflict_outside_window() {
        let now = Utc::now();
        let c = local(now);
        let r = remote("Ana", "ana@remote.com", Some(now - Duration::minutes(6)));
        assert_eq!(detect_conflict(&c, &r), None);
    }

    #[test]
    fn test_no_conflict_when_identity_matches() {
        let now = Utc::now();
        let mut c = local(now);
        c.company = Some("Local Co".into());
        let mut r = remote("Ana", "ana@x.com", Some(now));
        r.company = Some("Remote Co".into());
        // company is not part of detection
        assert_eq!(detect_conflict(&c, &r), None);
    }

    #[test]
    fn test_no_conflict_without_remote_timestamp() {
        let c = local(Utc::now());
        let r = remote("Other", "other@x.com", None);
        assert_eq!(detect_conflict(&c, &r), None);
    }

    #[test]
    fn test_blank_phone_equals_missing_phone() {
        let now = Utc::now();
        let mut c = local(now);
        c.phone = Some("  ".into());
        let r = remote("Ana", "ana@x.com", Some(now));
        assert_eq!(detect_conflict(&c, &r), None);
    }

    #[test]
    fn test_apply_remote_remote_wins_and_unions() {
        let mut c = local(Utc::now());
        c.phone = Some("111".into());
        c.tags = vec!["vip".into()];
        c.custom_fields.insert("Priority".into(), json!("High"));

        let mut r = remote("Ana Remote", "ana@remote.com", None);
        r.tags = vec!["vip".into(), "eu".into()];
        r.custom_fields.insert("Priority".into(), json!("Low"));
        r.custom_fields.insert("Region".into(), json!("EU"));

        apply_remote(&mut c, &r, true);
        assert_eq!(c.name, "Ana Remote");
        assert_eq!(c.email, "ana@remote.com");
        assert_eq!(c.phone.as_deref(), Some("111"));
        assert_eq!(c.tags, vec!["vip".to_string(), "eu".to_string()]);
        assert_eq!(c.custom_fields["Priority"], json!("Low"));
        assert_eq!(c.custom_fields["Region"], json!("EU"));
    }

    #[test]
    fn test_apply_remote_skips_custom_fields_when_unmapped() {
        let mut c = local(Utc::now());
        let mut r = remote("Ana", "ana@x.com", None);
        r.custom_fields.insert("Region".into(), json!("EU"));
        apply_remote(&mut c, &r, false);
        assert!(c.custom_fields.is_empty());
    }

    #[test]
    fn test_merge_for_resolution_local_wins_collisions() {
        let mut c = local(Utc::now());
        c.custom_fields.insert("Priority".into(), json!("High"));
        let mut r = remote("Remote Name", "remote@x.com", None);
        r.phone = Some("555".into());
        r.custom_fields.insert("Priority".into(), json!("Low"));
        r.custom_fields.insert("Region".into(), json!("EU"));

        merge_for_resolution(&mut c, &r);
        assert_eq!(c.name, "Ana");
        assert_eq!(c.email, "ana@x.com");
        assert_eq!(c.phone.as_deref(), Some("555"));
        let mut expected = Map::new();
        expected.insert("Priority".into(), json!("High"));
        expected.insert("Region".into(), json!("EU"));
        assert_eq!(c.custom_fields, expected);
    }

    fn warning_entry(contact_id: Uuid, local_email: &str) -> SyncLogEntry {
        let now = Utc::now();
        let mut c = local(now);
        c.email = local_email.into();
        let r = remote("Ana", "ana@remote.com", Some(now));
        SyncLogEntry::new(
            SyncOperation::Sync,
            LogStatus::Warning,
            "Conflict detected between local and Fish versions",
        )
        .contact(contact_id)
        .crm(Some("fish-1"))
        .details(json!({
            "conflict": true,
            "localData": ConflictSnapshot::from_local(&c),
            "remoteData": ConflictSnapshot::from_remote(&r),
        }))
    }

    #[test]
    fn test_reconstruct_keeps_latest_per_contact() {
        let id = Uuid::new_v4();
        // newest first
        let entries = vec![warning_entry(id, "newest@x.com"), warning_entry(id, "older@x.com")];
        let records = reconstruct_conflicts(&entries);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].local_data.email, "newest@x.com");
        assert_eq!(records[0].conflict_fields, vec!["email".to_string()]);
        assert_eq!(records[0].crm_id.as_deref(), Some("fish-1"));
    }

    #[test]
    fn test_reconstruct_drops_resolved_conflicts() {
        let id = Uuid::new_v4();
        let resolved = SyncLogEntry::new(
            SyncOperation::ConflictResolution,
            LogStatus::Success,
            "Conflict resolved with merge",
        )
        .contact(id);
        let entries = vec![resolved, warning_entry(id, "ana@x.com")];
        assert!(reconstruct_conflicts(&entries).is_empty());
    }

    #[test]
    fn test_reconstruct_ignores_non_conflict_warnings() {
        let entry = SyncLogEntry::new(SyncOperation::BulkSync, LogStatus::Warning, "Bulk sync completed")
            .contact(Uuid::new_v4());
        assert!(reconstruct_conflicts(&[entry]).is_empty());
    }
}
