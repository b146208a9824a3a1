pub mod backoff;
pub mod engine;
pub mod remote;
pub mod scheduler;
pub mod state;

pub use engine::{SyncEngine, SyncMode, SyncTrigger, OFFLINE, SYNC_IN_PROGRESS};
pub use remote::{HttpRemote, MemoryRemote, RemoteEndpoint};
pub use scheduler::SyncScheduler;
pub use state::SyncStatusCell;
