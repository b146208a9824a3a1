use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("remote rejected capture (HTTP {status}){body_suffix}")]
    RemoteRejected { status: u16, body_suffix: String },

    #[error("sync already in progress")]
    SyncInProgress,

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("capture not found: {0}")]
    NotFound(String),
}

/// Stable machine-readable code sent next to the human-readable message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidInput,
    StorageUnavailable,
    NetworkError,
    RemoteRejected,
    SyncInProgress,
    UnsupportedOperation,
    NotFound,
}

impl CaptureError {
    /// Wrap a storage-layer failure. The full context chain is kept in the
    /// message because the caller only ever sees this string.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::StorageUnavailable(format!("{err:#}"))
    }

    #[must_use]
    pub fn remote_rejected(status: u16, body: &str) -> Self {
        let trimmed = body.trim();
        let body_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            let clipped: String = trimmed.chars().take(200).collect();
            format!(": {clipped}")
        };
        Self::RemoteRejected {
            status,
            body_suffix,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Self::NetworkError(_) => ErrorCode::NetworkError,
            Self::RemoteRejected { .. } => ErrorCode::RemoteRejected,
            Self::SyncInProgress => ErrorCode::SyncInProgress,
            Self::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            Self::NotFound(_) => ErrorCode::NotFound,
        }
    }

    /// Delivery failures are recorded on the capture and retried; every
    /// other kind is surfaced to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::RemoteRejected { .. })
    }
}
