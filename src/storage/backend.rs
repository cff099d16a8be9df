//! Store traits consumed by the sync engine
//!
//! The engine treats its persistence as opaque stores. `Storage` implements
//! all three on SQLite (see `sqlite_backend`), and tests can swap in their own.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{FeedSyncError, Result};
use crate::types::{
    ActionType, ConflictLogEntry, QueueEntry, QueueEntryId, QueueStats, UsageRecord, UsageUpdate,
};

/// Durable queue of pending read/starred mutations
pub trait QueueStore: Send + Sync {
    /// Record a new local mutation
    fn enqueue(
        &self,
        action: ActionType,
        remote_item_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<QueueEntry>;

    /// Entries with `sync_attempts < max_attempts`, oldest first
    fn pending(&self, max_attempts: u32) -> Result<Vec<QueueEntry>>;

    /// Per-row attempt bookkeeping. Must never lower `sync_attempts`.
    fn update_attempt(
        &self,
        id: QueueEntryId,
        sync_attempts: u32,
        last_attempt_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Bulk delete by id set, returns rows removed
    fn delete(&self, ids: &[QueueEntryId]) -> Result<usize>;

    fn stats(&self, max_attempts: u32) -> Result<QueueStats>;

    /// Remove entries with `sync_attempts >= max_attempts`, returning the removed ids
    fn delete_failed(&self, max_attempts: u32) -> Result<Vec<QueueEntryId>>;
}

/// Explicit column values for a partial usage update. `None` leaves the column alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsagePatch {
    pub count: Option<i64>,
    pub zone1_usage: Option<i64>,
    pub zone1_limit: Option<i64>,
    pub zone2_usage: Option<i64>,
    pub zone2_limit: Option<i64>,
    pub reset_after_seconds: Option<i64>,
}

impl UsagePatch {
    /// Patch that applies `update` on top of an existing counter value
    pub fn from_update(existing_count: i64, update: &UsageUpdate) -> Self {
        Self {
            count: update.increment.map(|by| existing_count + by),
            zone1_usage: update.zone1_usage,
            zone1_limit: update.zone1_limit,
            zone2_usage: update.zone2_usage,
            zone2_limit: update.zone2_limit,
            reset_after_seconds: update.reset_after,
        }
    }
}

/// Per-service, per-day usage counters
pub trait UsageStore: Send + Sync {
    fn find(&self, service: &str, date: NaiveDate) -> Result<Option<UsageRecord>>;

    fn insert(&self, record: &UsageRecord) -> Result<()>;

    fn update(&self, service: &str, date: NaiveDate, patch: &UsagePatch) -> Result<()>;

    /// Whether `upsert` is a single atomic statement on this store
    fn supports_upsert(&self) -> bool {
        false
    }

    /// Atomically add `increment` and merge the reported fields
    fn upsert(&self, service: &str, date: NaiveDate, update: &UsageUpdate) -> Result<UsageRecord> {
        let _ = (service, date, update);
        Err(FeedSyncError::Storage(
            "atomic upsert not supported by this store".to_string(),
        ))
    }
}

/// Append-only destination for conflict audit entries
pub trait ConflictLogSink: Send + Sync {
    fn append(&self, entries: &[ConflictLogEntry]) -> Result<()>;
}
