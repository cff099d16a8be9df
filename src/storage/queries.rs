//! SQL for the queue, usage and conflict tables

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::backend::UsagePatch;
use crate::error::Result;
use crate::types::{
    ActionType, ConflictLogEntry, QueueEntry, QueueEntryId, QueueStats, UsageRecord, UsageUpdate,
};

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

fn queue_entry_from_row(row: &Row) -> rusqlite::Result<QueueEntry> {
    let action: String = row.get("action_type")?;
    let created_at: String = row.get("created_at")?;
    let last_attempt_at: Option<String> = row.get("last_attempt_at")?;
    let attempts: i64 = row.get("sync_attempts")?;

    Ok(QueueEntry {
        id: row.get("id")?,
        action_type: action.parse().map_err(|e: String| conversion_error(1, e))?,
        remote_item_id: row.get("remote_item_id")?,
        sync_attempts: attempts.max(0) as u32,
        created_at: parse_ts(&created_at)
            .ok_or_else(|| conversion_error(4, format!("bad created_at {:?}", created_at)))?,
        last_attempt_at: last_attempt_at.as_deref().and_then(parse_ts),
    })
}

// ============================================================================
// Queue
// ============================================================================

pub fn enqueue(
    conn: &Connection,
    action: ActionType,
    remote_item_id: &str,
    created_at: DateTime<Utc>,
) -> Result<QueueEntry> {
    conn.execute(
        "INSERT INTO sync_queue (action_type, remote_item_id, sync_attempts, created_at)
         VALUES (?, ?, 0, ?)",
        params![action.as_str(), remote_item_id, format_ts(created_at)],
    )?;

    Ok(QueueEntry {
        id: conn.last_insert_rowid(),
        action_type: action,
        remote_item_id: remote_item_id.to_string(),
        sync_attempts: 0,
        created_at,
        last_attempt_at: None,
    })
}

pub fn pending_entries(conn: &Connection, max_attempts: u32) -> Result<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, action_type, remote_item_id, sync_attempts, created_at, last_attempt_at
         FROM sync_queue
         WHERE sync_attempts < ?
         ORDER BY created_at ASC, id ASC",
    )?;

    let entries = stmt
        .query_map([max_attempts], queue_entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn update_attempt(
    conn: &Connection,
    id: QueueEntryId,
    sync_attempts: u32,
    last_attempt_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE sync_queue
         SET sync_attempts = MAX(sync_attempts, ?), last_attempt_at = ?
         WHERE id = ?",
        params![sync_attempts, format_ts(last_attempt_at), id],
    )?;
    Ok(())
}

pub fn delete_entries(conn: &Connection, ids: &[QueueEntryId]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("DELETE FROM sync_queue WHERE id IN ({})", placeholders);
    let removed = conn.execute(&sql, params_from_iter(ids.iter()))?;
    Ok(removed)
}

pub fn queue_stats(conn: &Connection, max_attempts: u32) -> Result<QueueStats> {
    let (pending, failed, retry_pending, oldest): (i64, i64, i64, Option<String>) = conn
        .query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN sync_attempts < ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sync_attempts >= ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sync_attempts > 0 AND sync_attempts < ?1 THEN 1 ELSE 0 END), 0),
                MIN(CASE WHEN sync_attempts < ?1 THEN created_at END)
             FROM sync_queue",
            [max_attempts],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

    Ok(QueueStats {
        pending: pending as u64,
        failed: failed as u64,
        retry_pending: retry_pending as u64,
        oldest_pending_at: oldest.as_deref().and_then(parse_ts),
    })
}

/// Delete exhausted entries and return their ids
pub fn delete_failed(conn: &Connection, max_attempts: u32) -> Result<Vec<QueueEntryId>> {
    let mut stmt =
        conn.prepare("DELETE FROM sync_queue WHERE sync_attempts >= ? RETURNING id")?;
    let ids = stmt
        .query_map([max_attempts], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<QueueEntryId>>>()?;
    Ok(ids)
}

// ============================================================================
// Usage
// ============================================================================

fn usage_from_row(row: &Row) -> rusqlite::Result<UsageRecord> {
    let date: String = row.get("date")?;
    Ok(UsageRecord {
        service: row.get("service")?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| conversion_error(1, e.to_string()))?,
        count: row.get("count")?,
        zone1_usage: row.get("zone1_usage")?,
        zone1_limit: row.get("zone1_limit")?,
        zone2_usage: row.get("zone2_usage")?,
        zone2_limit: row.get("zone2_limit")?,
        reset_after_seconds: row.get("reset_after_seconds")?,
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn find_usage(conn: &Connection, service: &str, date: NaiveDate) -> Result<Option<UsageRecord>> {
    let record = conn
        .query_row(
            "SELECT service, date, count, zone1_usage, zone1_limit, zone2_usage, zone2_limit,
                    reset_after_seconds
             FROM api_usage WHERE service = ? AND date = ?",
            params![service, format_date(date)],
            usage_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn insert_usage(conn: &Connection, record: &UsageRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO api_usage (service, date, count, zone1_usage, zone1_limit, zone2_usage,
                                zone2_limit, reset_after_seconds)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.service,
            format_date(record.date),
            record.count,
            record.zone1_usage,
            record.zone1_limit,
            record.zone2_usage,
            record.zone2_limit,
            record.reset_after_seconds,
        ],
    )?;
    Ok(())
}

pub fn update_usage(
    conn: &Connection,
    service: &str,
    date: NaiveDate,
    patch: &UsagePatch,
) -> Result<()> {
    conn.execute(
        "UPDATE api_usage SET
            count = COALESCE(?, count),
            zone1_usage = COALESCE(?, zone1_usage),
            zone1_limit = COALESCE(?, zone1_limit),
            zone2_usage = COALESCE(?, zone2_usage),
            zone2_limit = COALESCE(?, zone2_limit),
            reset_after_seconds = COALESCE(?, reset_after_seconds),
            updated_at = CURRENT_TIMESTAMP
         WHERE service = ? AND date = ?",
        params![
            patch.count,
            patch.zone1_usage,
            patch.zone1_limit,
            patch.zone2_usage,
            patch.zone2_limit,
            patch.reset_after_seconds,
            service,
            format_date(date),
        ],
    )?;
    Ok(())
}

/// Single-statement insert-or-merge. Absent fields bind as NULL and COALESCE keeps the stored value.
pub fn upsert_usage(
    conn: &Connection,
    service: &str,
    date: NaiveDate,
    update: &UsageUpdate,
) -> Result<UsageRecord> {
    conn.execute(
        "INSERT INTO api_usage (service, date, count, zone1_usage, zone1_limit, zone2_usage,
                                zone2_limit, reset_after_seconds)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(service, date) DO UPDATE SET
            count = count + excluded.count,
            zone1_usage = COALESCE(excluded.zone1_usage, zone1_usage),
            zone1_limit = COALESCE(excluded.zone1_limit, zone1_limit),
            zone2_usage = COALESCE(excluded.zone2_usage, zone2_usage),
            zone2_limit = COALESCE(excluded.zone2_limit, zone2_limit),
            reset_after_seconds = COALESCE(excluded.reset_after_seconds, reset_after_seconds),
            updated_at = CURRENT_TIMESTAMP",
        params![
            service,
            format_date(date),
            update.increment.unwrap_or(0),
            update.zone1_usage,
            update.zone1_limit,
            update.zone2_usage,
            update.zone2_limit,
            update.reset_after,
        ],
    )?;

    find_usage(conn, service, date)?.ok_or_else(|| {
        crate::error::FeedSyncError::Storage(format!(
            "usage row for {} on {} missing after upsert",
            service, date
        ))
    })
}

// ============================================================================
// Conflict log
// ============================================================================

pub fn append_conflicts(conn: &Connection, entries: &[ConflictLogEntry]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO conflict_log (timestamp, sync_session_id, entity_id, remote_id, conflict_type,
                                   local_value, remote_value, resolution, last_local_update,
                                   last_remote_known_update, note)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;

    for entry in entries {
        stmt.execute(params![
            format_ts(entry.timestamp),
            entry.sync_session_id,
            entry.entity_id,
            entry.remote_id,
            entry.conflict_type.as_str(),
            serde_json::to_string(&entry.local_value)?,
            serde_json::to_string(&entry.remote_value)?,
            entry.resolution.as_str(),
            entry.last_local_update.map(format_ts),
            entry.last_remote_known_update.map(format_ts),
            entry.note,
        ])?;
    }
    Ok(entries.len())
}

/// Entries written for one sync session, in insertion order
pub fn conflicts_for_session(conn: &Connection, session_id: &str) -> Result<Vec<ConflictLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, sync_session_id, entity_id, remote_id, conflict_type, local_value,
                remote_value, resolution, last_local_update, last_remote_known_update, note
         FROM conflict_log WHERE sync_session_id = ? ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([session_id], |row| {
            let timestamp: String = row.get(0)?;
            let conflict_type: String = row.get(4)?;
            let local_value: String = row.get(5)?;
            let remote_value: String = row.get(6)?;
            let resolution: String = row.get(7)?;
            let last_local: Option<String> = row.get(8)?;
            let last_remote: Option<String> = row.get(9)?;

            let json_err = |idx: usize, e: serde_json::Error| conversion_error(idx, e.to_string());

            Ok(ConflictLogEntry {
                timestamp: parse_ts(&timestamp)
                    .ok_or_else(|| conversion_error(0, format!("bad timestamp {:?}", timestamp)))?,
                sync_session_id: row.get(1)?,
                entity_id: row.get(2)?,
                remote_id: row.get(3)?,
                conflict_type: serde_json::from_value(serde_json::Value::String(conflict_type))
                    .map_err(|e| json_err(4, e))?,
                local_value: serde_json::from_str(&local_value).map_err(|e| json_err(5, e))?,
                remote_value: serde_json::from_str(&remote_value).map_err(|e| json_err(6, e))?,
                resolution: serde_json::from_value(serde_json::Value::String(resolution))
                    .map_err(|e| json_err(7, e))?,
                last_local_update: last_local.as_deref().and_then(parse_ts),
                last_remote_known_update: last_remote.as_deref().and_then(parse_ts),
                note: row.get(10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_pending_orders_by_created_at_and_filters_exhausted() {
        let storage = Storage::open_in_memory().unwrap();
        let base = Utc::now();

        storage
            .with_connection(|conn| {
                let late = enqueue(conn, ActionType::Read, "item-late", base)?;
                let early = enqueue(conn, ActionType::Star, "item-early", base - Duration::minutes(5))?;
                let exhausted = enqueue(conn, ActionType::Read, "item-dead", base - Duration::hours(1))?;
                update_attempt(conn, exhausted.id, 3, base)?;

                let pending = pending_entries(conn, 3)?;
                let ids: Vec<_> = pending.iter().map(|e| e.id).collect();
                assert_eq!(ids, vec![early.id, late.id]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_attempt_never_decreases() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let entry = enqueue(conn, ActionType::Unread, "a", Utc::now())?;
                update_attempt(conn, entry.id, 2, Utc::now())?;
                update_attempt(conn, entry.id, 1, Utc::now())?;
                let pending = pending_entries(conn, 10)?;
                assert_eq!(pending[0].sync_attempts, 2);
                assert!(pending[0].last_attempt_at.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_queue_stats_and_delete_failed() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let now = Utc::now();
                enqueue(conn, ActionType::Read, "fresh", now)?;
                let retry = enqueue(conn, ActionType::Read, "retry", now)?;
                let dead = enqueue(conn, ActionType::Read, "dead", now)?;
                update_attempt(conn, retry.id, 1, now)?;
                update_attempt(conn, dead.id, 5, now)?;

                let stats = queue_stats(conn, 5)?;
                assert_eq!(stats.pending, 2);
                assert_eq!(stats.retry_pending, 1);
                assert_eq!(stats.failed, 1);

                assert_eq!(delete_failed(conn, 5)?, vec![dead.id]);
                assert_eq!(queue_stats(conn, 5)?.failed, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_entries_ignores_unknown_ids() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let a = enqueue(conn, ActionType::Star, "a", Utc::now())?;
                assert_eq!(delete_entries(conn, &[a.id, 9999])?, 1);
                assert_eq!(delete_entries(conn, &[])?, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_upsert_merges_only_supplied_fields() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                upsert_usage(
                    conn,
                    "reader",
                    day(),
                    &UsageUpdate {
                        zone2_usage: Some(12),
                        zone2_limit: Some(100),
                        ..Default::default()
                    },
                )?;
                upsert_usage(conn, "reader", day(), &UsageUpdate::increment(1))?;
                let merged = upsert_usage(
                    conn,
                    "reader",
                    day(),
                    &UsageUpdate {
                        zone1_usage: Some(50),
                        zone1_limit: Some(5000),
                        ..Default::default()
                    },
                )?;

                assert_eq!(merged.count, 1);
                assert_eq!(merged.zone1_usage, Some(50));
                assert_eq!(merged.zone2_usage, Some(12));
                assert_eq!(merged.zone2_limit, Some(100));
                assert_eq!(merged.reset_after_seconds, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_usage_with_patch() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let mut record = UsageRecord::empty("reader", day());
                record.count = 3;
                record.zone1_limit = Some(100);
                insert_usage(conn, &record)?;

                update_usage(
                    conn,
                    "reader",
                    day(),
                    &UsagePatch {
                        count: Some(4),
                        zone1_usage: Some(9),
                        ..Default::default()
                    },
                )?;

                let stored = find_usage(conn, "reader", day())?.unwrap();
                assert_eq!(stored.count, 4);
                assert_eq!(stored.zone1_usage, Some(9));
                assert_eq!(stored.zone1_limit, Some(100));
                Ok(())
            })
            .unwrap();
    }
}
