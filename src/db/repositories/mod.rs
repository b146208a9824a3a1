pub mod captures;
pub mod sync_status;
