// Fish CRM synchronization: push/pull of single contacts, bulk sync, conflict
// detection and resolution, webhook ingestion and the real-time sync timer.
// All remote calls go through fish_client; every outcome lands in the sync log.

pub mod conflict;
pub mod engine;
pub mod handlers;
pub mod log;
pub mod realtime;
pub mod webhook;

use serde::{Deserialize, Serialize};

pub use engine::SyncEngine;
pub use realtime::RealTimeSync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToRemote,
    FromRemote,
    Bidirectional,
}

/// What a sync call does with a remote failure once it has been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    Propagate,
    /// Report a failed outcome and keep going.
    LogAndContinue,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    /// Skip conflict detection.
    pub force_sync: bool,
    pub on_error: ErrorPolicy,
}

impl SyncOptions {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            force_sync: false,
            on_error: ErrorPolicy::Propagate,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force_sync = true;
        self
    }

    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    UseLocal,
    UseRemote,
    Merge,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::UseLocal => "use_local",
            ConflictResolution::UseRemote => "use_remote",
            ConflictResolution::Merge => "merge",
        }
    }
}
