//! Persistence for the sync engine
//!
//! - `sync_queue`: pending read/starred mutations
//! - `api_usage`: per-day call counts and reported quota
//! - `conflict_log`: append-only reconciliation audit

mod backend;
mod conflict_log;
mod connection;
pub mod migrations;
pub mod queries;
mod sqlite_backend;

pub use backend::{ConflictLogSink, QueueStore, UsagePatch, UsageStore};
pub use conflict_log::JsonlConflictLog;
pub use connection::Storage;
