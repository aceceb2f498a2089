use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::models::sync::{LogStatus, SyncLogEntry, SyncOperation};
use crate::store::Store;

/// Default and maximum page sizes for log browsing.
pub const DEFAULT_LOG_LIMIT: usize = 50;
pub const MAX_LOG_LIMIT: usize = 200;
/// How far back analytics and conflict reconstruction look.
pub const ANALYTICS_WINDOW: usize = 200;

/// Appends to the sync log. A failed append is reported but never fails the
/// operation being logged.
pub async fn record(store: &dyn Store, entry: SyncLogEntry) {
    if let Err(e) = store.append_log(&entry).await {
        warn!(
            "Failed to append sync log entry ({:?}/{:?}): {e:#}",
            entry.operation, entry.status
        );
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_operation: BTreeMap<String, usize>,
    /// Share of successful entries, 0.0 – 1.0. Zero when there are no entries.
    pub success_rate: f64,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub open_conflicts: usize,
}

fn status_key(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Success => "success",
        LogStatus::Error => "error",
        LogStatus::Warning => "warning",
    }
}

fn operation_key(operation: SyncOperation) -> &'static str {
    match operation {
        SyncOperation::Sync => "sync",
        SyncOperation::Webhook => "webhook",
        SyncOperation::BulkSync => "bulk_sync",
        SyncOperation::ConflictResolution => "conflict_resolution",
    }
}

/// Aggregates log entries (any order) into dashboard counters.
pub fn compute_stats(entries: &[SyncLogEntry], open_conflicts: usize) -> SyncStats {
    let mut by_status = BTreeMap::new();
    let mut by_operation = BTreeMap::new();
    let mut successes = 0usize;
    let mut last_successful_sync: Option<DateTime<Utc>> = None;

    for entry in entries {
        *by_status.entry(status_key(entry.status).to_string()).or_insert(0) += 1;
        *by_operation
            .entry(operation_key(entry.operation).to_string())
            .or_insert(0) += 1;

        if entry.status == LogStatus::Success {
            successes += 1;
            if matches!(entry.operation, SyncOperation::Sync | SyncOperation::BulkSync)
                && last_successful_sync.map_or(true, |t| entry.timestamp > t)
            {
                last_successful_sync = Some(entry.timestamp);
            }
        }
    }

    let success_rate = if entries.is_empty() {
        0.0
    } else {
        successes as f64 / entries.len() as f64
    };

    SyncStats {
        total: entries.len(),
        by_status,
        by_operation,
        success_rate,
        last_successful_sync,
        open_conflicts,
    }
}
