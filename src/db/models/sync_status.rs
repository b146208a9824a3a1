use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide sync summary returned to status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub pending_count: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub syncing: bool,
    pub error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            pending_count: 0,
            last_sync: None,
            syncing: false,
            error: None,
        }
    }
}

/// The part of `SyncStatus` that survives a restart. `pending_count` is
/// recomputed from the store and `syncing` is always false at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSyncStatus {
    pub is_online: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&SyncStatus> for StoredSyncStatus {
    fn from(status: &SyncStatus) -> Self {
        Self {
            is_online: status.is_online,
            last_sync: status.last_sync,
            error: status.error.clone(),
        }
    }
}

/// Outcome of one sync pass. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub synced: u64,
    pub failed: u64,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}
