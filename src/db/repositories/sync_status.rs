use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::{
    helpers::{format_datetime, parse_optional_datetime},
    models::StoredSyncStatus,
    Database,
};

impl Database {
    pub async fn load_sync_status(&self) -> Result<StoredSyncStatus> {
        self.execute(|conn| {
            let (is_online, last_sync, error): (i64, Option<String>, Option<String>) = conn
                .query_row(
                    "SELECT is_online, last_sync, error FROM sync_status WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .with_context(|| "failed to read sync status")?;

            Ok(StoredSyncStatus {
                is_online: is_online != 0,
                last_sync: parse_optional_datetime(last_sync, "last_sync")?,
                error,
            })
        })
        .await
    }

    pub async fn save_sync_status(&self, status: StoredSyncStatus) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sync_status (id, is_online, last_sync, error)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     is_online = excluded.is_online,
                     last_sync = excluded.last_sync,
                     error = excluded.error",
                params![
                    status.is_online,
                    status.last_sync.as_ref().map(format_datetime),
                    status.error,
                ],
            )
            .with_context(|| "failed to save sync status")?;
            Ok(())
        })
        .await
    }
}
