use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{CaptureSource, SyncState};

/// Fixed-width RFC 3339 so that lexical order in SQLite matches time order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn parse_sync_state(value: &str) -> Result<SyncState> {
    match value {
        "Pending" => Ok(SyncState::Pending),
        "Syncing" => Ok(SyncState::Syncing),
        "Synced" => Ok(SyncState::Synced),
        "Failed" => Ok(SyncState::Failed),
        other => Err(anyhow!("unknown sync state {other}")),
    }
}

pub fn parse_source(value: &str) -> Result<CaptureSource> {
    match value {
        "popup" => Ok(CaptureSource::Popup),
        "content-script" => Ok(CaptureSource::ContentScript),
        "background" => Ok(CaptureSource::Background),
        other => Err(anyhow!("unknown capture source {other}")),
    }
}
