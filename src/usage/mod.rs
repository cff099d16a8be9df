//! API usage and rate-limit quota tracking
//!
//! The remote service reports two independent quota zones on every response
//! from its rate-limited surface. We keep one row per service per UTC day
//! with our own call count next to the last reported zone values.
//!
//! Single-writer constraint: when the store has no atomic upsert, `track`
//! falls back to read-then-insert-or-update, which races if two processes
//! write the same (service, date) row at once.

use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::header::HeaderMap;

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::{UsagePatch, UsageStore};
use crate::types::{TrackResult, UsageRecord, UsageUpdate};

pub const ZONE1_USAGE_HEADER: &str = "x-reader-zone1-usage";
pub const ZONE1_LIMIT_HEADER: &str = "x-reader-zone1-limit";
pub const ZONE2_USAGE_HEADER: &str = "x-reader-zone2-usage";
pub const ZONE2_LIMIT_HEADER: &str = "x-reader-zone2-limit";
pub const RESET_AFTER_HEADER: &str = "x-reader-limits-reset-after";

const ZONE_HEADERS: [&str; 4] = [
    ZONE1_USAGE_HEADER,
    ZONE1_LIMIT_HEADER,
    ZONE2_USAGE_HEADER,
    ZONE2_LIMIT_HEADER,
];

/// Parse a header number such as `"1,234"` or `"3599.42"`.
///
/// Thousands separators and the fractional part are dropped.
pub fn parse_header_number(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    let integral = cleaned.split('.').next().unwrap_or("");
    if integral.is_empty() || integral == "-" {
        return None;
    }
    integral.parse().ok()
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_header_number)
}

/// Quota fields reported by a response, or `None` when no zone header is present
pub fn usage_from_headers(headers: &HeaderMap) -> Option<UsageUpdate> {
    if !ZONE_HEADERS.iter().any(|name| headers.contains_key(*name)) {
        return None;
    }

    let update = UsageUpdate {
        increment: None,
        zone1_usage: header_number(headers, ZONE1_USAGE_HEADER),
        zone1_limit: header_number(headers, ZONE1_LIMIT_HEADER),
        zone2_usage: header_number(headers, ZONE2_USAGE_HEADER),
        zone2_limit: header_number(headers, ZONE2_LIMIT_HEADER),
        reset_after: header_number(headers, RESET_AFTER_HEADER),
    };

    // present but unparseable headers must not degrade into a counter bump
    update.has_zone_fields().then_some(update)
}

/// Records call counts and remote-reported quota per service/day
pub struct UsageTracker {
    store: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn UsageStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// UTC date usage is bucketed under
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Write usage for (service, date). Never raises.
    ///
    /// With any zone field present this is a field merge; otherwise it is a
    /// pure counter increment (default +1).
    pub fn track(&self, service: &str, date: NaiveDate, update: UsageUpdate) -> TrackResult {
        let update = if update.has_zone_fields() {
            update
        } else {
            UsageUpdate::increment(update.increment.unwrap_or(1))
        };

        let result = if self.store.supports_upsert() {
            self.store.upsert(service, date, &update)
        } else {
            self.read_then_write(service, date, &update)
        };

        match result {
            Ok(record) => TrackResult::ok(record),
            Err(e) => {
                tracing::warn!(service, %date, error = %e, "Failed to record API usage");
                TrackResult::failed(e.to_string())
            }
        }
    }

    fn read_then_write(
        &self,
        service: &str,
        date: NaiveDate,
        update: &UsageUpdate,
    ) -> Result<UsageRecord> {
        match self.store.find(service, date)? {
            Some(mut existing) => {
                let patch = UsagePatch::from_update(existing.count, update);
                self.store.update(service, date, &patch)?;
                update.apply_to(&mut existing);
                Ok(existing)
            }
            None => {
                let mut record = UsageRecord::empty(service, date);
                update.apply_to(&mut record);
                self.store.insert(&record)?;
                Ok(record)
            }
        }
    }

    /// Count one outbound call against today
    pub fn record_call(&self, service: &str) -> TrackResult {
        self.track(service, self.today(), UsageUpdate::increment(1))
    }

    /// Capture quota headers from one response. `None` when the response
    /// carried no zone headers (not from the rate-limited surface).
    pub fn capture_headers(&self, service: &str, headers: &HeaderMap) -> Option<TrackResult> {
        let update = usage_from_headers(headers)?;
        tracing::debug!(
            service,
            zone1_usage = ?update.zone1_usage,
            zone1_limit = ?update.zone1_limit,
            zone2_usage = ?update.zone2_usage,
            zone2_limit = ?update.zone2_limit,
            reset_after = ?update.reset_after,
            "Captured rate-limit headers"
        );
        Some(self.track(service, self.today(), update))
    }

    pub fn usage_for(&self, service: &str, date: NaiveDate) -> Result<Option<UsageRecord>> {
        self.store.find(service, date)
    }
}
