use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    db::{SyncResult, SyncState},
    error::{CaptureError, CaptureResult, ErrorCode},
    sync::SYNC_IN_PROGRESS,
};

/// Closed set of operations a front-end surface may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    CaptureThought,
    SyncNow,
    GetRecentThoughts,
    GetSyncStatus,
    ClearStorage,
    /// Fire-and-forget connectivity notification; produces no response.
    ConnectivityChanged,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::CaptureThought,
        MessageType::SyncNow,
        MessageType::GetRecentThoughts,
        MessageType::GetSyncStatus,
        MessageType::ClearStorage,
        MessageType::ConnectivityChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::CaptureThought => "CAPTURE_THOUGHT",
            MessageType::SyncNow => "SYNC_NOW",
            MessageType::GetRecentThoughts => "GET_RECENT_THOUGHTS",
            MessageType::GetSyncStatus => "GET_SYNC_STATUS",
            MessageType::ClearStorage => "CLEAR_STORAGE",
            MessageType::ConnectivityChanged => "CONNECTIVITY_CHANGED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    pub fn new(kind: MessageType, payload: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            payload,
        }
    }
}

/// `{success, code?, error?, ...data}`; data fields sit at the top level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            code: None,
            error: None,
            data: Map::new(),
        }
    }

    pub fn failure(err: &CaptureError) -> Self {
        Self {
            success: false,
            code: Some(err.code()),
            error: Some(err.to_string()),
            data: Map::new(),
        }
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> CaptureResult<Self> {
        let value = serde_json::to_value(value)
            .map_err(|err| CaptureError::InvalidInput(format!("unserializable {key}: {err}")))?;
        self.data.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn from_sync_result(result: SyncResult) -> CaptureResult<Self> {
        let code = match result.error.as_deref() {
            Some(SYNC_IN_PROGRESS) => Some(ErrorCode::SyncInProgress),
            _ => None,
        };
        let response = Self {
            success: result.success,
            code,
            error: result.error,
            data: Map::new(),
        };
        response
            .with("synced", result.synced)?
            .with("failed", result.failed)?
            .with("errors", result.errors)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentThoughtsPayload {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub sync_state: Option<SyncState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityPayload {
    pub online: bool,
}

/// Missing or null payloads decode as the type's default.
pub fn parse_payload<T>(payload: Value) -> CaptureResult<T>
where
    T: DeserializeOwned + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload)
        .map_err(|err| CaptureError::InvalidInput(format!("malformed payload: {err}")))
}
