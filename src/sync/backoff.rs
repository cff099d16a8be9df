//! In-memory retry backoff hints
//!
//! The persisted `sync_attempts` counter is authoritative. These hints only
//! record when a failed entry would ideally be retried, so an external
//! scheduler (or a log reader) can tell an item is cooling down.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::types::QueueEntryId;

/// Ceiling on the exponent so huge attempt counts do not overflow
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// `base_ms × 2^(attempts-1)`. Zero attempts means no backoff.
pub fn intended_backoff_ms(base_ms: u64, attempts: u32) -> u64 {
    if attempts == 0 {
        return 0;
    }
    let exponent = (attempts - 1).min(MAX_BACKOFF_EXPONENT);
    base_ms.saturating_mul(1u64 << exponent)
}

/// Backoff state for one queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffHint {
    pub attempts: u32,
    pub backoff_ms: u64,
    pub retry_after: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct BackoffHints {
    hints: Mutex<HashMap<QueueEntryId, BackoffHint>>,
}

impl BackoffHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure that brought `id` to `attempts`
    pub fn record(
        &self,
        id: QueueEntryId,
        attempts: u32,
        base_ms: u64,
        failed_at: DateTime<Utc>,
    ) -> BackoffHint {
        let backoff_ms = intended_backoff_ms(base_ms, attempts);
        let hint = BackoffHint {
            attempts,
            backoff_ms,
            retry_after: failed_at
                .checked_add_signed(Duration::milliseconds(backoff_ms.min(i64::MAX as u64) as i64))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.hints.lock().insert(id, hint);
        hint
    }

    /// Drop hints for entries that left the queue
    pub fn evict(&self, ids: &[QueueEntryId]) {
        let mut hints = self.hints.lock();
        for id in ids {
            hints.remove(id);
        }
    }

    pub fn hint(&self, id: QueueEntryId) -> Option<BackoffHint> {
        self.hints.lock().get(&id).copied()
    }

    /// True while `now` is still before the recorded retry time
    pub fn is_backing_off(&self, id: QueueEntryId, now: DateTime<Utc>) -> bool {
        self.hint(id).is_some_and(|hint| now < hint.retry_after)
    }

    pub fn len(&self) -> usize {
        self.hints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.lock().is_empty()
    }
}
