//! Capture data models.
//!
//! A `Capture` is one user-submitted thought. Everything except the sync
//! bookkeeping fields is immutable after ingress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Front-end surface a capture originated from. Informational only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureSource {
    Popup,
    ContentScript,
    Background,
}

impl CaptureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureSource::Popup => "popup",
            CaptureSource::ContentScript => "content-script",
            CaptureSource::Background => "background",
        }
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        CaptureSource::Background
    }
}

/// Serialized camelCase; the capitalized names used by the store are
/// accepted on input as well.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    #[serde(alias = "Pending")]
    Pending,
    #[serde(alias = "Syncing")]
    Syncing,
    #[serde(alias = "Synced")]
    Synced,
    #[serde(alias = "Failed")]
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "Pending",
            SyncState::Syncing => "Syncing",
            SyncState::Synced => "Synced",
            SyncState::Failed => "Failed",
        }
    }

    /// Allowed moves: `Pending -> Syncing -> {Synced | Failed}` and
    /// `Failed -> Pending`. Nothing leaves `Synced`.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (SyncState::Pending, SyncState::Syncing)
                | (SyncState::Syncing, SyncState::Synced)
                | (SyncState::Syncing, SyncState::Failed)
                | (SyncState::Failed, SyncState::Pending)
        )
    }
}

/// Where a capture was taken. Set once at ingress.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    /// Milliseconds since the Unix epoch, as reported by the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CaptureContext>,
    pub created_at: DateTime<Utc>,
    pub source: CaptureSource,
    pub sync_state: SyncState,
    pub synced_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

/// Change to the sync bookkeeping of one capture.
///
/// `update_sync_fields` applies it only if `state` is a legal successor of
/// the stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPatch {
    pub state: SyncState,
    pub retry_count: Option<u32>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncPatch {
    pub fn syncing(now: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Syncing,
            retry_count: None,
            attempted_at: Some(now),
            synced_at: None,
            last_error: None,
        }
    }

    pub fn synced(now: DateTime<Utc>) -> Self {
        Self {
            state: SyncState::Synced,
            retry_count: None,
            attempted_at: None,
            synced_at: Some(now),
            last_error: None,
        }
    }

    pub fn failed(retry_count: u32, error: String) -> Self {
        Self {
            state: SyncState::Failed,
            retry_count: Some(retry_count),
            attempted_at: None,
            synced_at: None,
            last_error: Some(error),
        }
    }

    /// `Failed -> Pending`, optionally overwriting the stored retry count.
    pub fn requeue(retry_count: Option<u32>) -> Self {
        Self {
            state: SyncState::Pending,
            retry_count,
            attempted_at: None,
            synced_at: None,
            last_error: None,
        }
    }
}
