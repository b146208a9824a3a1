use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::db::{StoredSyncStatus, SyncStatus};

/// Shared sync summary plus the single-pass flag.
///
/// Readers clone the last committed `SyncStatus` and never wait on a pass.
#[derive(Default)]
pub struct SyncStatusCell {
    status: RwLock<SyncStatus>,
    in_flight: AtomicBool,
}

impl SyncStatusCell {
    pub fn new(stored: StoredSyncStatus, pending_count: u64) -> Self {
        Self {
            status: RwLock::new(SyncStatus {
                is_online: stored.is_online,
                pending_count,
                last_sync: stored.last_sync,
                syncing: false,
                error: stored.error,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.read().clone()
    }

    pub fn update<F>(&self, apply: F) -> SyncStatus
    where
        F: FnOnce(&mut SyncStatus),
    {
        let mut guard = self.write();
        apply(&mut guard);
        guard.clone()
    }

    /// Take the pass flag. `None` means another pass holds it.
    pub fn try_begin_pass(self: &Arc<Self>) -> Option<PassGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.write().syncing = true;
        Some(PassGuard { cell: self.clone() })
    }

    pub fn pass_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn read(&self) -> RwLockReadGuard<'_, SyncStatus> {
        self.status.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SyncStatus> {
        self.status.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the pass flag on drop, including on early return.
pub struct PassGuard {
    cell: Arc<SyncStatusCell>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.cell.write().syncing = false;
        self.cell.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_pass_is_refused_until_guard_drops() {
        let cell = Arc::new(SyncStatusCell::default());

        let guard = cell.try_begin_pass().expect("first pass");
        assert!(cell.snapshot().syncing);
        assert!(cell.try_begin_pass().is_none());

        drop(guard);
        assert!(!cell.snapshot().syncing);
        assert!(!cell.pass_in_flight());
        assert!(cell.try_begin_pass().is_some());
    }

    #[test]
    fn restores_persisted_fields() {
        let cell = SyncStatusCell::new(
            StoredSyncStatus {
                is_online: false,
                last_sync: None,
                error: Some("boom".into()),
            },
            3,
        );
        let status = cell.snapshot();
        assert!(!status.is_online);
        assert_eq!(status.pending_count, 3);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert!(!status.syncing);
    }
}
