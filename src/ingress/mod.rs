use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::{repositories::captures::InsertOutcome, Capture, CaptureContext, CaptureSource, SyncState},
    error::{CaptureError, CaptureResult},
    sync::SyncEngine,
};

const ID_ATTEMPTS: usize = 3;

/// What a front-end surface hands over for a new capture.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInput {
    pub text: String,
    #[serde(default)]
    pub context: Option<CaptureContext>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Caller-chosen token that makes retrying the same capture safe.
    #[serde(default)]
    pub client_token: Option<String>,
}

impl CaptureInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Validates and stores new captures, then nudges the sync engine.
pub struct CaptureIngress {
    engine: Arc<SyncEngine>,
    last_created_at: Mutex<Option<DateTime<Utc>>>,
}

impl CaptureIngress {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            last_created_at: Mutex::new(None),
        }
    }

    /// Store a new capture and return it. The write is durable before this
    /// returns; syncing happens later and is not awaited.
    pub async fn capture(
        &self,
        input: CaptureInput,
        source: CaptureSource,
    ) -> CaptureResult<Capture> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(CaptureError::InvalidInput("capture text is empty".into()));
        }
        let max_len = self.engine.settings().max_text_len;
        if text.chars().count() > max_len {
            return Err(CaptureError::InvalidInput(format!(
                "capture text exceeds {max_len} characters"
            )));
        }
        let client_token = input
            .client_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let mut capture = Capture {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            context: input.context,
            created_at: self.next_created_at(),
            source,
            sync_state: SyncState::Pending,
            synced_at: None,
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
            tags: normalize_tags(input.tags),
            metadata: input.metadata,
            client_token,
        };

        for _ in 0..ID_ATTEMPTS {
            let outcome = self
                .engine
                .store()
                .insert_capture(&capture)
                .await
                .map_err(CaptureError::storage)?;

            match outcome {
                InsertOutcome::Inserted => {
                    log::info!("stored capture {} from {}", capture.id, source.as_str());
                    self.engine.capture_added().await;
                    return Ok(capture);
                }
                InsertOutcome::Duplicate(existing) => {
                    log::info!("capture token replayed; returning {}", existing.id);
                    return Ok(existing);
                }
                InsertOutcome::IdTaken => {
                    log::warn!("capture id collision on {}; regenerating", capture.id);
                    capture.id = Uuid::new_v4().to_string();
                }
            }
        }

        Err(CaptureError::StorageUnavailable(
            "could not allocate a unique capture id".into(),
        ))
    }

    /// Capture times strictly increase within the process so oldest-first
    /// delivery has a total order even inside one clock tick. Microsecond
    /// precision matches what the store keeps.
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self
            .last_created_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now().trunc_subsecs(6);
        let next = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !normalized.iter().any(|existing| existing == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}
