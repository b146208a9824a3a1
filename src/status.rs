//! Read-only queries for the popup and monitoring surfaces.

use std::sync::Arc;

use log::warn;

use crate::{
    db::{Capture, SyncState, SyncStatus, DEFAULT_LIST_LIMIT},
    sync::SyncEngine,
};

pub struct StatusService {
    engine: Arc<SyncEngine>,
}

impl StatusService {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub async fn recent_captures(&self, limit: Option<usize>) -> Vec<Capture> {
        self.list_captures(None, limit, 0).await
    }

    /// Store read failures degrade to an empty page so the UI never stalls
    /// on a broken store.
    pub async fn list_captures(
        &self,
        filter: Option<SyncState>,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Capture> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        match self
            .engine
            .store()
            .list_captures(filter, limit, offset)
            .await
        {
            Ok(captures) => captures,
            Err(err) => {
                warn!("capture listing failed, returning empty page: {err:#}");
                Vec::new()
            }
        }
    }

    pub async fn get_capture(&self, id: &str) -> Option<Capture> {
        match self.engine.store().get_capture(id).await {
            Ok(capture) => capture,
            Err(err) => {
                warn!("capture lookup for {id} failed: {err:#}");
                None
            }
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.engine.status()
    }
}
