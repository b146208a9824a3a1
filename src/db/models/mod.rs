pub mod capture;
pub mod sync_status;

pub use capture::{Capture, CaptureContext, CaptureSource, SyncPatch, SyncState};
pub use sync_status::{StoredSyncStatus, SyncResult, SyncStatus};
