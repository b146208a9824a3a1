use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::{
    db::{Capture, Database, StoredSyncStatus, SyncPatch, SyncResult, SyncState, SyncStatus},
    error::{CaptureError, CaptureResult},
    settings::SyncSettings,
};

use super::{backoff, remote::RemoteEndpoint, state::SyncStatusCell};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const SYNC_IN_PROGRESS: &str = "sync already in progress";
pub const OFFLINE: &str = "offline";

/// Reasons the scheduler should consider running a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    CaptureAdded,
    ConnectivityRestored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Timer, connectivity or post-capture pass: honors the retry ceiling
    /// and per-capture backoff.
    Automatic,
    /// User-initiated: attempts everything unsynced and resets spent retry
    /// budgets.
    Manual,
}

/// Owns the capture store handle, the remote endpoint and the sync state.
///
/// Only the engine mutates a capture's sync fields or the `SyncStatus`;
/// other components read through it.
pub struct SyncEngine {
    db: Database,
    remote: Arc<dyn RemoteEndpoint>,
    settings: SyncSettings,
    status: Arc<SyncStatusCell>,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
}

impl SyncEngine {
    /// Restore persisted status and recompute the pending count. The
    /// returned receiver feeds the scheduler.
    pub async fn open(
        db: Database,
        remote: Arc<dyn RemoteEndpoint>,
        settings: SyncSettings,
    ) -> CaptureResult<(Arc<Self>, mpsc::UnboundedReceiver<SyncTrigger>)> {
        let stored = db.load_sync_status().await.map_err(CaptureError::storage)?;
        let pending_count = db.count_unsynced().await.map_err(CaptureError::storage)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let engine = Arc::new(Self {
            db,
            remote,
            settings,
            status: Arc::new(SyncStatusCell::new(stored, pending_count)),
            triggers: tx,
        });
        Ok((engine, rx))
    }

    pub fn store(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Last committed status. Never waits on an in-flight pass.
    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    pub fn pass_in_flight(&self) -> bool {
        self.status.pass_in_flight()
    }

    /// User-initiated pass (`SYNC_NOW`).
    pub async fn sync_now(&self) -> SyncResult {
        self.sync_pass(SyncMode::Manual).await
    }

    /// Pass started by the scheduler. Skipped while offline so that a
    /// known-dead network does not burn retry budgets.
    pub async fn run_automatic_pass(&self) -> SyncResult {
        if !self.status.snapshot().is_online {
            return SyncResult::rejected(OFFLINE);
        }
        self.sync_pass(SyncMode::Automatic).await
    }

    pub async fn sync_pass(&self, mode: SyncMode) -> SyncResult {
        let Some(_guard) = self.status.try_begin_pass() else {
            log_info!("sync pass ({mode:?}) refused: another pass is running");
            return SyncResult::rejected(SYNC_IN_PROGRESS);
        };

        // Holding the pass flag, no `Syncing` row can belong to a live
        // delivery; any that exist were left by an aborted pass.
        match self.db.reset_stale_syncing().await {
            Ok(0) => {}
            Ok(reset) => log_warn!("requeued {reset} capture(s) left in Syncing"),
            Err(err) => {
                return self
                    .abort_pass(format!("failed to requeue interrupted captures: {err:#}"))
                    .await
            }
        }

        self.run_pass(mode).await
    }

    async fn run_pass(&self, mode: SyncMode) -> SyncResult {
        let started_at = Utc::now();
        let max_retries = self.settings.max_retries;

        let ceiling = match mode {
            SyncMode::Automatic => Some(max_retries),
            SyncMode::Manual => None,
        };
        let candidates = match self.db.list_sync_candidates(ceiling).await {
            Ok(candidates) => candidates,
            Err(err) => {
                return self
                    .abort_pass(format!("failed to read pending captures: {err:#}"))
                    .await
            }
        };

        let eligible: Vec<Capture> = match mode {
            SyncMode::Automatic => candidates
                .into_iter()
                .filter(|capture| {
                    backoff::is_due(capture, started_at, self.settings.backoff_base())
                })
                .collect(),
            SyncMode::Manual => candidates,
        };

        log_info!(
            "sync pass ({mode:?}) starting with {} eligible capture(s)",
            eligible.len()
        );

        let mut result = SyncResult {
            success: true,
            ..SyncResult::default()
        };

        for capture in &eligible {
            match self.deliver_one(capture, mode).await {
                Ok(DeliveryOutcome::Synced) => result.synced += 1,
                Ok(DeliveryOutcome::Vanished) => {}
                Ok(DeliveryOutcome::Failed(message)) => {
                    result.failed += 1;
                    result.errors.push(format!("{}: {message}", capture.id));
                }
                Err(err) => {
                    // Store fault: stop here and hand claimed rows back.
                    let message = format!("local store failed on capture {}: {err:#}", capture.id);
                    self.requeue_claimed().await;
                    let mut aborted = self.abort_pass(message).await;
                    aborted.synced = result.synced;
                    aborted.failed = result.failed;
                    aborted.errors = result.errors;
                    return aborted;
                }
            }
        }

        result.success = result.failed == 0;

        let last_sync = (result.synced > 0 || eligible.is_empty()).then(Utc::now);
        result.error = (result.failed > 0).then(|| {
            format!(
                "{} capture(s) failed to sync; first error: {}",
                result.failed,
                result.errors.first().map(String::as_str).unwrap_or("unknown")
            )
        });
        self.finish_pass(last_sync, result.error.clone()).await;

        log_info!(
            "sync pass ({mode:?}) finished: {} synced, {} failed",
            result.synced,
            result.failed
        );
        result
    }

    /// End a pass that could not run to completion. `lastSync` is left alone.
    async fn abort_pass(&self, message: String) -> SyncResult {
        log_error!("sync pass aborted: {message}");
        self.finish_pass(None, Some(message.clone())).await;
        SyncResult::rejected(message)
    }

    /// Best-effort return of a claimed capture to `Pending` after a store
    /// fault. If this fails too, the next pass retries it on entry.
    async fn requeue_claimed(&self) {
        if let Err(err) = self.db.reset_stale_syncing().await {
            log_warn!("could not requeue claimed capture: {err:#}");
        }
    }

    /// `Err` means the store failed; delivery failures are `Ok(Failed)`.
    async fn deliver_one(
        &self,
        capture: &Capture,
        mode: SyncMode,
    ) -> anyhow::Result<DeliveryOutcome> {
        let reset = mode == SyncMode::Manual && capture.retry_count >= self.settings.max_retries;
        let retry_count = if reset { 0 } else { capture.retry_count };

        if capture.sync_state == SyncState::Failed {
            let requeued = self
                .db
                .update_sync_fields(&capture.id, SyncPatch::requeue(None))
                .await?;
            if !requeued {
                return Ok(DeliveryOutcome::Vanished);
            }
        }

        let mut claim = SyncPatch::syncing(Utc::now());
        if reset {
            claim.retry_count = Some(0);
        }
        if !self.db.update_sync_fields(&capture.id, claim).await? {
            return Ok(DeliveryOutcome::Vanished);
        }

        match self.remote.deliver(capture).await {
            Ok(()) => {
                self.db
                    .update_sync_fields(&capture.id, SyncPatch::synced(Utc::now()))
                    .await?;
                Ok(DeliveryOutcome::Synced)
            }
            Err(err) => {
                let message = err.to_string();
                let retry_count = retry_count.saturating_add(1);
                log_warn!(
                    "delivery of capture {} failed (attempt {retry_count}): {message}",
                    capture.id
                );
                self.db
                    .update_sync_fields(&capture.id, SyncPatch::failed(retry_count, message.clone()))
                    .await?;
                Ok(DeliveryOutcome::Failed(message))
            }
        }
    }

    async fn finish_pass(
        &self,
        last_sync: Option<chrono::DateTime<Utc>>,
        error: Option<String>,
    ) {
        let pending_count = self.recount_pending().await;
        let error = match error {
            Some(error) => Some(error),
            None => self.exhausted_notice().await,
        };
        let snapshot = self.status.update(|status| {
            if let Some(count) = pending_count {
                status.pending_count = count;
            }
            if last_sync.is_some() {
                status.last_sync = last_sync;
            }
            status.error = error;
        });
        self.persist_status(&snapshot).await;
    }

    /// Record a connectivity signal. Coming back online asks the scheduler
    /// for a pass.
    pub async fn set_online(&self, online: bool) {
        let mut was_online = online;
        let snapshot = self.status.update(|status| {
            was_online = status.is_online;
            status.is_online = online;
        });
        if was_online == online {
            return;
        }

        log_info!("connectivity changed: online = {online}");
        self.persist_status(&snapshot).await;
        if online {
            self.signal(SyncTrigger::ConnectivityRestored);
        }
    }

    /// Called by ingress after a capture is durably stored.
    pub async fn capture_added(&self) {
        self.refresh_pending_count().await;
        self.signal(SyncTrigger::CaptureAdded);
    }

    pub async fn refresh_pending_count(&self) -> Option<u64> {
        let count = self.recount_pending().await?;
        self.status.update(|status| status.pending_count = count);
        Some(count)
    }

    /// Delete every capture. A pass in flight keeps working on its snapshot
    /// and its updates to removed captures become no-ops.
    pub async fn clear_storage(&self) -> CaptureResult<u64> {
        let removed = self
            .db
            .delete_all_captures()
            .await
            .map_err(CaptureError::storage)?;
        let pending_count = self.recount_pending().await.unwrap_or(0);
        let snapshot = self.status.update(|status| {
            status.pending_count = pending_count;
            status.error = None;
        });
        self.persist_status(&snapshot).await;
        log_info!("cleared {removed} capture(s) from local store");
        Ok(removed)
    }

    /// Startup recovery for captures a crashed process left in `Syncing`.
    pub async fn recover_interrupted(&self) -> CaptureResult<u64> {
        let reset = self
            .db
            .reset_stale_syncing()
            .await
            .map_err(CaptureError::storage)?;
        if reset > 0 {
            log_warn!("returned {reset} interrupted capture(s) to Pending");
        }
        Ok(reset)
    }

    async fn recount_pending(&self) -> Option<u64> {
        match self.db.count_unsynced().await {
            Ok(count) => Some(count),
            Err(err) => {
                log_error!("failed to count pending captures: {err:#}");
                None
            }
        }
    }

    async fn exhausted_notice(&self) -> Option<String> {
        match self.db.count_exhausted(self.settings.max_retries).await {
            Ok(0) => None,
            Ok(count) => Some(format!(
                "{count} capture(s) gave up after {} attempts; sync manually to retry",
                self.settings.max_retries
            )),
            Err(err) => {
                log_error!("failed to count exhausted captures: {err:#}");
                None
            }
        }
    }

    async fn persist_status(&self, status: &SyncStatus) {
        if let Err(err) = self.db.save_sync_status(StoredSyncStatus::from(status)).await {
            log_error!("failed to persist sync status: {err:#}");
        }
    }

    fn signal(&self, trigger: SyncTrigger) {
        if self.triggers.send(trigger).is_err() {
            log::debug!("no scheduler listening for {trigger:?}");
        }
    }
}

enum DeliveryOutcome {
    Synced,
    Failed(String),
    /// Removed from the store mid-pass.
    Vanished,
}
