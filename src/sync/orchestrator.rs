//! Queue drain cycles: gating, batching, retry bookkeeping and the periodic timer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::backoff::BackoffHints;
use crate::auth::TokenManager;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{FeedSyncError, Result};
use crate::remote::edit_tag_request;
use crate::storage::QueueStore;
use crate::types::{ActionType, QueueEntry, QueueEntryId, QueueStats};
use crate::usage::UsageTracker;

/// One remote call worth of entries, all with the same action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub action: ActionType,
    pub entries: Vec<QueueEntry>,
}

impl Batch {
    pub fn ids(&self) -> Vec<QueueEntryId> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

/// Group by action type in first-appearance order, then chunk each group.
///
/// Entries keep their input (created_at) order within a group.
pub fn plan_batches(entries: &[QueueEntry], batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);

    let mut groups: Vec<(ActionType, Vec<QueueEntry>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(action, _)| *action == entry.action_type) {
            Some((_, group)) => group.push(entry.clone()),
            None => groups.push((entry.action_type, vec![entry.clone()])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(action, group)| {
            group
                .chunks(batch_size)
                .map(|chunk| Batch {
                    action,
                    entries: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Counters for one executed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub trigger: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pending: usize,
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub entries_synced: usize,
    pub entries_failed: usize,
}

/// What a drain request did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Queue had nothing eligible
    Idle,
    /// Below every threshold; nothing changed
    Skipped { pending: usize, oldest_age_ms: i64 },
    /// Another cycle holds the in-flight flag
    AlreadyRunning,
    Completed(CycleReport),
}

/// Snapshot for health endpoints and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub timer_active: bool,
    pub in_flight: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
    pub backing_off: usize,
}

#[derive(Debug, Default)]
struct CycleState {
    last_cycle_at: Option<DateTime<Utc>>,
    last_report: Option<CycleReport>,
    last_error: Option<String>,
}

struct TimerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Clears the in-flight flag however the cycle ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the pending-mutation queue to the remote service
pub struct SyncOrchestrator {
    queue: Arc<dyn QueueStore>,
    tokens: Arc<TokenManager>,
    usage: Arc<UsageTracker>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    service: String,
    api_base_url: String,
    backoff: BackoffHints,
    in_flight: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
    state: Mutex<CycleState>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        tokens: Arc<TokenManager>,
        usage: Arc<UsageTracker>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        service: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            tokens,
            usage,
            clock,
            config,
            service: service.into(),
            api_base_url: api_base_url.into(),
            backoff: BackoffHints::new(),
            in_flight: AtomicBool::new(false),
            timer: Mutex::new(None),
            state: Mutex::new(CycleState::default()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn backoff(&self) -> &BackoffHints {
        &self.backoff
    }

    /// Periodic entry point
    pub async fn process_queue(&self) -> Result<CycleOutcome> {
        self.run_cycle("timer").await
    }

    /// Same as a timer tick; returns `AlreadyRunning` instead of waiting
    pub async fn trigger_manual_sync(&self) -> Result<CycleOutcome> {
        self.run_cycle("manual").await
    }

    async fn run_cycle(&self, trigger: &str) -> Result<CycleOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(trigger, "Sync cycle already running");
            return Ok(CycleOutcome::AlreadyRunning);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let result = self.drain(trigger).await;

        let mut state = self.state.lock();
        state.last_cycle_at = Some(self.clock.now());
        match &result {
            Ok(CycleOutcome::Completed(report)) => {
                state.last_report = Some(report.clone());
                state.last_error = None;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(trigger, error = %e, "Sync cycle aborted");
                state.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn drain(&self, trigger: &str) -> Result<CycleOutcome> {
        let entries = self.queue.pending(self.config.max_retries)?;
        if entries.is_empty() {
            tracing::debug!(trigger, "Sync queue empty");
            return Ok(CycleOutcome::Idle);
        }

        let started_at = self.clock.now();
        let retry_pending = entries.iter().any(|e| e.sync_attempts > 0);
        let oldest_age = entries
            .iter()
            .map(|e| started_at - e.created_at)
            .max()
            .unwrap_or_else(chrono::Duration::zero);
        let enough_changes = entries.len() >= self.config.min_changes;
        let stale = oldest_age >= self.config.staleness_threshold();

        if !(retry_pending || enough_changes || stale) {
            tracing::debug!(
                trigger,
                pending = entries.len(),
                oldest_age_ms = oldest_age.num_milliseconds(),
                "Skipping sync cycle, below thresholds"
            );
            return Ok(CycleOutcome::Skipped {
                pending: entries.len(),
                oldest_age_ms: oldest_age.num_milliseconds(),
            });
        }

        let batches = plan_batches(&entries, self.config.batch_size);
        tracing::info!(
            trigger,
            pending = entries.len(),
            batches = batches.len(),
            retry_pending,
            stale,
            "Starting sync cycle"
        );

        let mut report = CycleReport {
            trigger: trigger.to_string(),
            started_at: Some(started_at),
            pending: entries.len(),
            ..Default::default()
        };

        for batch in &batches {
            if self.send_batch(batch).await? {
                report.batches_sent += 1;
                report.entries_synced += batch.entries.len();
            } else {
                report.batches_failed += 1;
                report.entries_failed += batch.entries.len();
            }
        }

        report.finished_at = Some(self.clock.now());
        tracing::info!(
            trigger,
            batches_sent = report.batches_sent,
            batches_failed = report.batches_failed,
            entries_synced = report.entries_synced,
            entries_failed = report.entries_failed,
            "Sync cycle finished"
        );
        Ok(CycleOutcome::Completed(report))
    }

    /// `Ok(true)` when acknowledged, `Ok(false)` on a counted failure,
    /// `Err` only for fatal errors that must abort the cycle.
    async fn send_batch(&self, batch: &Batch) -> Result<bool> {
        let request = edit_tag_request(
            &self.api_base_url,
            batch.action,
            batch.entries.iter().map(|e| e.remote_item_id.as_str()),
        );

        let outcome = self
            .tokens
            .authenticated_request_observed(request, |response| {
                self.usage.capture_headers(&self.service, &response.headers);
            })
            .await;
        let failure = match outcome {
            Ok(response) => {
                if response.is_success() {
                    self.acknowledge(batch);
                    return Ok(true);
                }
                FeedSyncError::Api {
                    status: response.status,
                    body: response.body.chars().take(200).collect(),
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => e,
        };

        self.mark_failed(batch, &failure);
        Ok(false)
    }

    fn acknowledge(&self, batch: &Batch) {
        let ids = batch.ids();
        match self.queue.delete(&ids) {
            Ok(removed) => tracing::debug!(
                action = %batch.action,
                removed,
                "Batch acknowledged"
            ),
            // entries stay queued and are re-sent; tag edits are idempotent
            Err(e) => tracing::warn!(
                action = %batch.action,
                error = %e,
                "Failed to delete acknowledged entries"
            ),
        }
        self.backoff.evict(&ids);
        self.usage.record_call(&self.service);
    }

    fn mark_failed(&self, batch: &Batch, error: &FeedSyncError) {
        let now = self.clock.now();
        for entry in &batch.entries {
            let attempts = entry.sync_attempts.saturating_add(1);
            if let Err(e) = self.queue.update_attempt(entry.id, attempts, now) {
                tracing::warn!(id = entry.id, error = %e, "Failed to record sync attempt");
                continue;
            }
            let hint = self
                .backoff
                .record(entry.id, attempts, self.config.base_backoff_ms, now);
            tracing::debug!(
                id = entry.id,
                attempts,
                backoff_ms = hint.backoff_ms,
                "Entry scheduled for retry"
            );
        }
        tracing::warn!(
            action = %batch.action,
            entries = batch.entries.len(),
            retryable = error.is_retryable(),
            error = %error,
            "Batch failed"
        );
    }

    /// Begin periodic cycles, replacing any running timer. The first tick
    /// fires one `interval` from now.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        self.stop();

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(orchestrator) = weak.upgrade() else { break };
                        if let Err(e) = orchestrator.process_queue().await {
                            tracing::warn!(error = %e, "Periodic sync failed");
                        }
                    }
                }
            }
            tracing::info!("Sync timer stopped");
        });

        *self.timer.lock() = Some(TimerHandle {
            stop: stop_tx,
            task,
        });
        tracing::info!(interval_ms = period.as_millis() as u64, "Sync timer started");
    }

    /// Prevent future cycles. A cycle already running finishes normally.
    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            let _ = handle.stop.send(());
            drop(handle.task);
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn get_queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats(self.config.max_retries)
    }

    /// Purge entries that exhausted their attempts. Never called automatically.
    pub fn clear_failed_items(&self) -> Result<usize> {
        let removed = self.queue.delete_failed(self.config.max_retries)?;
        self.backoff.evict(&removed);
        tracing::info!(removed = removed.len(), "Cleared failed sync entries");
        Ok(removed.len())
    }

    pub fn status(&self) -> OrchestratorStatus {
        let state = self.state.lock();
        OrchestratorStatus {
            timer_active: self.is_running(),
            in_flight: self.is_in_flight(),
            last_cycle_at: state.last_cycle_at,
            last_report: state.last_report.clone(),
            last_error: state.last_error.clone(),
            backing_off: self.backoff.len(),
        }
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            let _ = handle.stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: i64, action: ActionType, minute: u32) -> QueueEntry {
        QueueEntry {
            id,
            action_type: action,
            remote_item_id: format!("tag:item/{}", id),
            sync_attempts: 0,
            created_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, minute, 0).unwrap(),
            last_attempt_at: None,
        }
    }

    #[test]
    fn test_plan_batches_groups_in_first_appearance_order() {
        let entries = vec![
            entry(1, ActionType::Star, 0),
            entry(2, ActionType::Read, 1),
            entry(3, ActionType::Star, 2),
            entry(4, ActionType::Read, 3),
            entry(5, ActionType::Read, 4),
        ];

        let batches = plan_batches(&entries, 2);
        let shape: Vec<(ActionType, Vec<i64>)> =
            batches.iter().map(|b| (b.action, b.ids())).collect();

        assert_eq!(
            shape,
            vec![
                (ActionType::Star, vec![1, 3]),
                (ActionType::Read, vec![2, 4]),
                (ActionType::Read, vec![5]),
            ]
        );
    }

    #[test]
    fn test_plan_batches_five_read_three_star() {
        let mut entries: Vec<_> = (1..=5).map(|i| entry(i, ActionType::Read, i as u32)).collect();
        entries.extend((6..=8).map(|i| entry(i, ActionType::Star, i as u32)));

        let sizes: Vec<usize> = plan_batches(&entries, 4)
            .iter()
            .map(|b| b.entries.len())
            .collect();
        assert_eq!(sizes, vec![4, 1, 3]);
    }

    #[test]
    fn test_plan_batches_empty_and_zero_size() {
        assert!(plan_batches(&[], 10).is_empty());
        let entries = vec![entry(1, ActionType::Unread, 0), entry(2, ActionType::Unread, 1)];
        assert_eq!(plan_batches(&entries, 0).len(), 2);
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(CycleOutcome::Skipped {
            pending: 3,
            oldest_age_ms: 1000,
        })
        .unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["pending"], 3);
    }
}
