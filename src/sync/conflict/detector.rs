//! Local-vs-remote read/starred conflict detection

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::storage::ConflictLogSink;
use crate::types::{
    ArticleFlags, ConflictLogEntry, ConflictType, LocalArticle, RemoteArticle, Resolution,
};

/// Session totals above this are flagged in the report
pub const HIGH_CONFLICT_THRESHOLD: usize = 10;

/// Read or starred flag differs
pub fn states_differ(local: &LocalArticle, remote: &RemoteArticle) -> bool {
    local.is_read != remote.is_read || local.is_starred != remote.is_starred
}

/// Local mutation strictly newer than the last confirmed sync.
///
/// Never synced counts as newer; no local mutation is never a change.
pub fn has_local_changes(entity: &LocalArticle) -> bool {
    match (entity.local_updated_at, entity.last_synced_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(updated), Some(synced)) => updated > synced,
    }
}

fn classify(local: &LocalArticle, remote: &RemoteArticle) -> ConflictType {
    let read = local.is_read != remote.is_read;
    let starred = local.is_starred != remote.is_starred;
    match (read, starred) {
        (true, true) => ConflictType::Both,
        (true, false) => ConflictType::ReadStatus,
        _ => ConflictType::StarredStatus,
    }
}

fn resolution_note(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Remote => "remote state applied; local mutation superseded",
        Resolution::Local => "local state kept; remote state will be overwritten",
    }
}

/// Per-session counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    pub session_id: String,
    pub total: usize,
    pub read_status: usize,
    pub starred_status: usize,
    pub both: usize,
    pub resolved_local: usize,
    pub resolved_remote: usize,
}

/// Compares incoming remote records against local ones for one sync session
pub struct ConflictDetector {
    session_id: String,
    policy: Resolution,
    sink: Arc<dyn ConflictLogSink>,
    clock: Arc<dyn Clock>,
    entries: Vec<ConflictLogEntry>,
    flushed: usize,
}

impl ConflictDetector {
    /// New session with a random id and the remote-wins policy
    pub fn new(sink: Arc<dyn ConflictLogSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            policy: Resolution::default(),
            sink,
            clock,
            entries: Vec::new(),
            flushed: 0,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_policy(mut self, policy: Resolution) -> Self {
        self.policy = policy;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn policy(&self) -> Resolution {
        self.policy
    }

    pub fn entries(&self) -> &[ConflictLogEntry] {
        &self.entries
    }

    /// Classify a divergence and apply `resolution`. `None` when the states
    /// agree or the local side was never mutated.
    pub fn detect_conflict(
        &self,
        local: &LocalArticle,
        remote: &RemoteArticle,
        resolution: Resolution,
    ) -> Option<ConflictLogEntry> {
        if !states_differ(local, remote) || local.local_updated_at.is_none() {
            return None;
        }

        Some(ConflictLogEntry {
            timestamp: self.clock.now(),
            sync_session_id: self.session_id.clone(),
            entity_id: local.id,
            remote_id: remote.remote_id.clone(),
            conflict_type: classify(local, remote),
            local_value: local.flags(),
            remote_value: remote.flags(),
            resolution,
            last_local_update: local.local_updated_at,
            last_remote_known_update: local.last_synced_at,
            note: resolution_note(resolution).to_string(),
        })
    }

    /// Detect against each remote record's local twin and accumulate.
    /// Remote records with no local twin are new articles, not conflicts.
    pub fn process_batch(
        &mut self,
        local_index: &HashMap<String, LocalArticle>,
        remote_records: &[RemoteArticle],
    ) -> Vec<ConflictLogEntry> {
        let detected: Vec<ConflictLogEntry> = remote_records
            .iter()
            .filter_map(|remote| {
                let local = local_index.get(&remote.remote_id)?;
                self.detect_conflict(local, remote, self.policy)
            })
            .collect();

        if !detected.is_empty() {
            tracing::info!(
                session = %self.session_id,
                conflicts = detected.len(),
                checked = remote_records.len(),
                "Detected state conflicts"
            );
        }

        self.entries.extend(detected.iter().cloned());
        detected
    }

    /// Flags to apply locally after the policy has run
    pub fn resolved_state(
        &self,
        local: &LocalArticle,
        remote: &RemoteArticle,
        conflict: Option<&ConflictLogEntry>,
    ) -> ArticleFlags {
        match conflict.map(|c| c.resolution) {
            Some(Resolution::Local) => local.flags(),
            _ => remote.flags(),
        }
    }

    /// Append not-yet-written entries to the sink. Failures are logged and
    /// the entries stay pending for the next call. Returns entries written.
    pub fn write_log(&mut self) -> usize {
        let pending = &self.entries[self.flushed..];
        if pending.is_empty() {
            return 0;
        }

        match self.sink.append(pending) {
            Ok(()) => {
                let written = pending.len();
                self.flushed = self.entries.len();
                tracing::debug!(session = %self.session_id, written, "Conflict log written");
                written
            }
            Err(e) => {
                tracing::warn!(
                    session = %self.session_id,
                    error = %e,
                    "Failed to write conflict log"
                );
                0
            }
        }
    }

    pub fn summary(&self) -> ConflictSummary {
        let mut summary = ConflictSummary {
            session_id: self.session_id.clone(),
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.conflict_type {
                ConflictType::ReadStatus => summary.read_status += 1,
                ConflictType::StarredStatus => summary.starred_status += 1,
                ConflictType::Both => summary.both += 1,
            }
            match entry.resolution {
                Resolution::Local => summary.resolved_local += 1,
                Resolution::Remote => summary.resolved_remote += 1,
            }
        }
        summary
    }

    pub fn report(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(out, "Conflict report for session {}", summary.session_id);
        let _ = writeln!(out, "  total: {}", summary.total);
        let _ = writeln!(
            out,
            "  by type: read_status={} starred_status={} both={}",
            summary.read_status, summary.starred_status, summary.both
        );
        let _ = writeln!(
            out,
            "  by resolution: remote={} local={}",
            summary.resolved_remote, summary.resolved_local
        );
        if summary.total > HIGH_CONFLICT_THRESHOLD {
            let _ = writeln!(
                out,
                "  WARNING: high conflict rate ({} > {}); local and remote may be drifting",
                summary.total, HIGH_CONFLICT_THRESHOLD
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{FeedSyncError, Result};
    use crate::types::ConflictLogEntry;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct MemorySink {
        written: Mutex<Vec<ConflictLogEntry>>,
        fail: Mutex<bool>,
    }

    impl ConflictLogSink for MemorySink {
        fn append(&self, entries: &[ConflictLogEntry]) -> Result<()> {
            if *self.fail.lock() {
                return Err(FeedSyncError::Storage("sink offline".into()));
            }
            self.written.lock().extend_from_slice(entries);
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap()
    }

    fn local(id: i64, is_read: bool, is_starred: bool, mutated: bool) -> LocalArticle {
        LocalArticle {
            id,
            remote_id: format!("r{}", id),
            is_read,
            is_starred,
            local_updated_at: mutated.then(|| t0() + Duration::minutes(5)),
            last_synced_at: Some(t0()),
        }
    }

    fn remote(id: i64, is_read: bool, is_starred: bool) -> RemoteArticle {
        RemoteArticle {
            remote_id: format!("r{}", id),
            is_read,
            is_starred,
        }
    }

    fn detector(sink: Arc<MemorySink>) -> ConflictDetector {
        ConflictDetector::new(sink, Arc::new(ManualClock::new(t0() + Duration::hours(1))))
            .with_session_id("session-1")
    }

    #[test]
    fn test_has_local_changes() {
        let mut article = local(1, true, false, true);
        assert!(has_local_changes(&article));

        article.last_synced_at = Some(t0() + Duration::minutes(5));
        assert!(!has_local_changes(&article));

        article.last_synced_at = None;
        assert!(has_local_changes(&article));

        article.local_updated_at = None;
        assert!(!has_local_changes(&article));
    }

    #[test]
    fn test_fresh_local_read_vs_remote_unread() {
        let detector = detector(Arc::new(MemorySink::default()));
        let entry = detector
            .detect_conflict(
                &local(1, true, false, true),
                &remote(1, false, false),
                Resolution::default(),
            )
            .unwrap();

        assert_eq!(entry.conflict_type, ConflictType::ReadStatus);
        assert_eq!(entry.resolution, Resolution::Remote);
        assert_eq!(entry.entity_id, 1);
        assert_eq!(entry.sync_session_id, "session-1");
        assert!(entry.local_value.is_read);
        assert!(!entry.remote_value.is_read);
        assert_eq!(entry.last_remote_known_update, Some(t0()));
    }

    #[test]
    fn test_no_conflict_when_equal_or_unmutated() {
        let detector = detector(Arc::new(MemorySink::default()));
        assert!(detector
            .detect_conflict(&local(1, true, true, true), &remote(1, true, true), Resolution::Remote)
            .is_none());
        assert!(detector
            .detect_conflict(&local(1, true, true, false), &remote(1, false, false), Resolution::Remote)
            .is_none());
    }

    #[test]
    fn test_classification() {
        let detector = detector(Arc::new(MemorySink::default()));
        let both = detector
            .detect_conflict(&local(1, true, true, true), &remote(1, false, false), Resolution::Local)
            .unwrap();
        assert_eq!(both.conflict_type, ConflictType::Both);
        assert_eq!(both.resolution, Resolution::Local);

        let starred = detector
            .detect_conflict(&local(1, false, true, true), &remote(1, false, false), Resolution::Remote)
            .unwrap();
        assert_eq!(starred.conflict_type, ConflictType::StarredStatus);
    }

    #[test]
    fn test_process_batch_and_summary() {
        let mut detector = detector(Arc::new(MemorySink::default()));
        let index: HashMap<String, LocalArticle> = [
            local(1, true, false, true),
            local(2, false, true, true),
            local(3, false, false, false),
        ]
        .into_iter()
        .map(|a| (a.remote_id.clone(), a))
        .collect();

        let detected = detector.process_batch(
            &index,
            &[
                remote(1, false, false),
                remote(2, false, true),
                remote(3, true, true),
                remote(99, true, false),
            ],
        );

        assert_eq!(detected.len(), 1);
        let summary = detector.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.read_status, 1);
        assert_eq!(summary.resolved_remote, 1);
        assert!(!detector.report().contains("WARNING"));
    }

    #[test]
    fn test_report_warns_above_threshold() {
        let mut detector = detector(Arc::new(MemorySink::default()));
        let index: HashMap<String, LocalArticle> = (1..=11)
            .map(|i| local(i, true, false, true))
            .map(|a| (a.remote_id.clone(), a))
            .collect();
        let remotes: Vec<_> = (1..=11).map(|i| remote(i, false, false)).collect();

        detector.process_batch(&index, &remotes[..10]);
        assert!(!detector.report().contains("WARNING"));

        detector.process_batch(&index, &remotes[10..]);
        assert!(detector.report().contains("WARNING: high conflict rate"));
    }

    #[test]
    fn test_write_log_is_best_effort_and_incremental() {
        let sink = Arc::new(MemorySink::default());
        let mut detector = detector(sink.clone());
        let index: HashMap<String, LocalArticle> = [local(1, true, false, true)]
            .into_iter()
            .map(|a| (a.remote_id.clone(), a))
            .collect();

        detector.process_batch(&index, &[remote(1, false, false)]);
        *sink.fail.lock() = true;
        assert_eq!(detector.write_log(), 0);

        *sink.fail.lock() = false;
        assert_eq!(detector.write_log(), 1);
        assert_eq!(detector.write_log(), 0);
        assert_eq!(sink.written.lock().len(), 1);
    }

    #[test]
    fn test_resolved_state_follows_policy() {
        let detector = detector(Arc::new(MemorySink::default()));
        let l = local(1, true, false, true);
        let r = remote(1, false, true);

        let remote_wins = detector.detect_conflict(&l, &r, Resolution::Remote);
        assert_eq!(detector.resolved_state(&l, &r, remote_wins.as_ref()), r.flags());

        let local_wins = detector.detect_conflict(&l, &r, Resolution::Local);
        assert_eq!(detector.resolved_state(&l, &r, local_wins.as_ref()), l.flags());

        assert_eq!(detector.resolved_state(&l, &r, None), r.flags());
    }
}
