//! SQLite implementation of the engine's store traits

use chrono::{DateTime, NaiveDate, Utc};

use super::backend::{ConflictLogSink, QueueStore, UsagePatch, UsageStore};
use super::connection::Storage;
use super::queries;
use crate::error::Result;
use crate::types::{
    ActionType, ConflictLogEntry, QueueEntry, QueueEntryId, QueueStats, UsageRecord, UsageUpdate,
};

impl QueueStore for Storage {
    fn enqueue(
        &self,
        action: ActionType,
        remote_item_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        self.with_connection(|conn| queries::enqueue(conn, action, remote_item_id, created_at))
    }

    fn pending(&self, max_attempts: u32) -> Result<Vec<QueueEntry>> {
        self.with_connection(|conn| queries::pending_entries(conn, max_attempts))
    }

    fn update_attempt(
        &self,
        id: QueueEntryId,
        sync_attempts: u32,
        last_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_connection(|conn| queries::update_attempt(conn, id, sync_attempts, last_attempt_at))
    }

    fn delete(&self, ids: &[QueueEntryId]) -> Result<usize> {
        self.with_transaction(|conn| queries::delete_entries(conn, ids))
    }

    fn stats(&self, max_attempts: u32) -> Result<QueueStats> {
        self.with_connection(|conn| queries::queue_stats(conn, max_attempts))
    }

    fn delete_failed(&self, max_attempts: u32) -> Result<Vec<QueueEntryId>> {
        self.with_connection(|conn| queries::delete_failed(conn, max_attempts))
    }
}

impl UsageStore for Storage {
    fn find(&self, service: &str, date: NaiveDate) -> Result<Option<UsageRecord>> {
        self.with_connection(|conn| queries::find_usage(conn, service, date))
    }

    fn insert(&self, record: &UsageRecord) -> Result<()> {
        self.with_connection(|conn| queries::insert_usage(conn, record))
    }

    fn update(&self, service: &str, date: NaiveDate, patch: &UsagePatch) -> Result<()> {
        self.with_connection(|conn| queries::update_usage(conn, service, date, patch))
    }

    fn supports_upsert(&self) -> bool {
        true
    }

    fn upsert(&self, service: &str, date: NaiveDate, update: &UsageUpdate) -> Result<UsageRecord> {
        self.with_transaction(|conn| queries::upsert_usage(conn, service, date, update))
    }
}

impl ConflictLogSink for Storage {
    fn append(&self, entries: &[ConflictLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.with_transaction(|conn| queries::append_conflicts(conn, entries))?;
        Ok(())
    }
}
