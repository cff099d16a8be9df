//! feedsync - read/starred reconciliation for a personal feed reader
//!
//! Drains locally queued read/starred mutations to a remote feed service in
//! batches, keeps the OAuth credential fresh, tracks the service's rate-limit
//! quota and audits local/remote state conflicts.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod types;
pub mod usage;

pub use config::{FeedSyncConfig, SyncConfig};
pub use error::{FeedSyncError, Result};
pub use storage::Storage;
pub use sync::{SyncEngine, SyncOrchestrator};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
