use anyhow::{bail, Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{
        format_datetime, parse_datetime, parse_optional_datetime, parse_source, parse_sync_state,
        to_u32,
    },
    models::{Capture, SyncPatch, SyncState},
    Database,
};

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

const CAPTURE_COLUMNS: &str = "id, text, context_json, created_at, source, sync_state, synced_at, \
     retry_count, last_attempt_at, last_error, tags_json, metadata_json, client_token";

/// Result of `insert_capture`.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A capture with the same client token already exists.
    Duplicate(Capture),
    /// The generated id is already taken; the caller should pick another.
    IdTaken,
}

fn row_to_capture(row: &Row) -> Result<Capture> {
    let context_json: Option<String> = row.get("context_json")?;
    let created_at: String = row.get("created_at")?;
    let source: String = row.get("source")?;
    let sync_state: String = row.get("sync_state")?;
    let synced_at: Option<String> = row.get("synced_at")?;
    let retry_count: i64 = row.get("retry_count")?;
    let last_attempt_at: Option<String> = row.get("last_attempt_at")?;
    let tags_json: Option<String> = row.get("tags_json")?;
    let metadata_json: Option<String> = row.get("metadata_json")?;

    Ok(Capture {
        id: row.get("id")?,
        text: row.get("text")?,
        context: context_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("failed to parse context_json")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        source: parse_source(&source)?,
        sync_state: parse_sync_state(&sync_state)?,
        synced_at: parse_optional_datetime(synced_at, "synced_at")?,
        retry_count: to_u32(retry_count, "retry_count")?,
        last_attempt_at: parse_optional_datetime(last_attempt_at, "last_attempt_at")?,
        last_error: row.get("last_error")?,
        tags: tags_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("failed to parse tags_json")?
            .unwrap_or_default(),
        metadata: metadata_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("failed to parse metadata_json")?,
        client_token: row.get("client_token")?,
    })
}

fn collect_captures(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<Capture>> {
    let mut captures = Vec::new();
    while let Some(row) = rows.next()? {
        captures.push(row_to_capture(row)?);
    }
    Ok(captures)
}

fn capture_by_token(conn: &rusqlite::Connection, token: &str) -> Result<Option<Capture>> {
    let sql = format!("SELECT {CAPTURE_COLUMNS} FROM captures WHERE client_token = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![token])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_capture(row)?)),
        None => Ok(None),
    }
}

impl Database {
    /// Insert a freshly created capture.
    ///
    /// Client-token dedup and id collision checks run in the same task as
    /// the insert, so two racing callers cannot both win.
    pub async fn insert_capture(&self, capture: &Capture) -> Result<InsertOutcome> {
        let record = capture.clone();
        self.execute(move |conn| {
            if let Some(token) = record.client_token.as_deref() {
                if let Some(existing) = capture_by_token(conn, token)? {
                    return Ok(InsertOutcome::Duplicate(existing));
                }
            }

            let taken: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM captures WHERE id = ?1",
                    params![record.id],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Ok(InsertOutcome::IdTaken);
            }

            let context_json = record
                .context
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let tags_json = if record.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&record.tags)?)
            };
            let metadata_json = record
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            conn.execute(
                "INSERT INTO captures (id, text, context_json, created_at, source, sync_state, synced_at,
                                       retry_count, last_attempt_at, last_error, tags_json, metadata_json, client_token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.id,
                    record.text,
                    context_json,
                    format_datetime(&record.created_at),
                    record.source.as_str(),
                    record.sync_state.as_str(),
                    record.synced_at.as_ref().map(format_datetime),
                    i64::from(record.retry_count),
                    record.last_attempt_at.as_ref().map(format_datetime),
                    record.last_error,
                    tags_json,
                    metadata_json,
                    record.client_token,
                ],
            )
            .with_context(|| "failed to insert capture")?;

            Ok(InsertOutcome::Inserted)
        })
        .await
    }

    pub async fn get_capture(&self, id: &str) -> Result<Option<Capture>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {CAPTURE_COLUMNS} FROM captures WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_capture(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn find_by_client_token(&self, token: &str) -> Result<Option<Capture>> {
        let token = token.to_string();
        self.execute(move |conn| capture_by_token(conn, &token)).await
    }

    /// Newest first, ties broken by id (descending) so pages never shift.
    pub async fn list_captures(
        &self,
        filter: Option<SyncState>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Capture>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.execute(move |conn| match filter {
            Some(state) => {
                let sql = format!(
                    "SELECT {CAPTURE_COLUMNS} FROM captures
                     WHERE sync_state = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2 OFFSET ?3"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![state.as_str(), limit, offset])?;
                collect_captures(&mut rows)
            }
            None => {
                let sql = format!(
                    "SELECT {CAPTURE_COLUMNS} FROM captures
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?1 OFFSET ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![limit, offset])?;
                collect_captures(&mut rows)
            }
        })
        .await
    }

    /// Pending and Failed captures, oldest first. With `max_retries` set,
    /// captures whose retry budget is spent are left out.
    pub async fn list_sync_candidates(&self, max_retries: Option<u32>) -> Result<Vec<Capture>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {CAPTURE_COLUMNS} FROM captures
                 WHERE sync_state IN ('Pending', 'Failed')
                   AND (?1 IS NULL OR retry_count < ?1)
                 ORDER BY created_at ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![max_retries.map(i64::from)])?;
            collect_captures(&mut rows)
        })
        .await
    }

    /// Apply a sync patch. Returns `false` when the capture no longer
    /// exists, which happens when the store is cleared during a pass.
    pub async fn update_sync_fields(&self, id: &str, patch: SyncPatch) -> Result<bool> {
        let id = id.to_string();
        self.execute(move |conn| {
            let current: Option<(String, Option<String>, i64, Option<String>)> = conn
                .query_row(
                    "SELECT sync_state, synced_at, retry_count, last_error FROM captures WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let Some((state_raw, synced_at, retry_count, last_error)) = current else {
                return Ok(false);
            };

            let current_state = parse_sync_state(&state_raw)?;
            if !current_state.can_transition_to(patch.state) {
                bail!(
                    "illegal sync transition {} -> {} for capture {id}",
                    current_state.as_str(),
                    patch.state.as_str()
                );
            }

            let synced_at = match (patch.state, synced_at) {
                (SyncState::Synced, None) => patch.synced_at.as_ref().map(format_datetime),
                (_, existing) => existing,
            };
            let retry_count = patch.retry_count.map(i64::from).unwrap_or(retry_count);
            let last_error = match patch.state {
                SyncState::Synced => None,
                _ => patch.last_error.or(last_error),
            };

            conn.execute(
                "UPDATE captures
                 SET sync_state = ?1,
                     synced_at = ?2,
                     retry_count = ?3,
                     last_attempt_at = COALESCE(?4, last_attempt_at),
                     last_error = ?5
                 WHERE id = ?6",
                params![
                    patch.state.as_str(),
                    synced_at,
                    retry_count,
                    patch.attempted_at.as_ref().map(format_datetime),
                    last_error,
                    id,
                ],
            )
            .with_context(|| "failed to update capture sync fields")?;

            Ok(true)
        })
        .await
    }

    pub async fn count_unsynced(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM captures WHERE sync_state != 'Synced'",
                [],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Failed captures whose retry budget is spent; only a manual pass
    /// will attempt them again.
    pub async fn count_exhausted(&self, max_retries: u32) -> Result<u64> {
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM captures WHERE sync_state = 'Failed' AND retry_count >= ?1",
                params![i64::from(max_retries)],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }

    pub async fn delete_all_captures(&self) -> Result<u64> {
        self.execute(|conn| {
            let removed = conn
                .execute("DELETE FROM captures", [])
                .with_context(|| "failed to clear captures")?;
            Ok(removed as u64)
        })
        .await
    }

    /// Return captures stuck in `Syncing` by a previous process to `Pending`.
    pub async fn reset_stale_syncing(&self) -> Result<u64> {
        self.execute(|conn| {
            let reset = conn
                .execute(
                    "UPDATE captures SET sync_state = 'Pending' WHERE sync_state = 'Syncing'",
                    [],
                )
                .with_context(|| "failed to reset stale syncing captures")?;
            Ok(reset as u64)
        })
        .await
    }
}
