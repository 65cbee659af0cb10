pub mod config;
pub mod scheduler;

pub use config::{SyncConfig, SyncConfigPatch, SyncError, MAX_INTERVAL_MINUTES, SYNC_CONFIG_KEY};
pub use scheduler::SyncScheduler;
