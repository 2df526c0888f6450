//! Rollover rules for the ledger's time-bucketed state.
//!
//! Every check is idempotent and safe to run before any mutation that
//! depends on it: `add_entry` runs the daily and yearly checks,
//! `increment_quota` runs the quota check.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeDelta};

use crate::clock::date_key;
use crate::models::{LedgerState, QuotaCounters, YearlyMirror};

/// Local hour at which the daily bucket is pruned.
pub const DAILY_RESET_HOUR: u32 = 4;

/// How far past 04:00 to look for an existing local time on a DST gap day.
const GAP_SEARCH_MINUTES: i64 = 3 * 60;

/// Minimum time between quota rollovers.
pub const QUOTA_RESET_INTERVAL_MS: i64 = 6 * 60 * 60 * 1000;

/// Today's 04:00 in device-local time.
///
/// When a DST gap swallows 04:00, the first local minute after it that
/// exists is used instead.
#[must_use]
pub fn daily_boundary(now: &DateTime<Local>) -> Option<DateTime<Local>> {
    let start = now.date_naive().and_hms_opt(DAILY_RESET_HOUR, 0, 0)?;
    first_existing(start, |naive| naive.and_local_timezone(Local).earliest())
}

fn first_existing<T>(start: NaiveDateTime, resolve: impl Fn(NaiveDateTime) -> Option<T>) -> Option<T> {
    (0..=GAP_SEARCH_MINUTES).find_map(|m| resolve(start + TimeDelta::minutes(m)))
}

#[must_use]
pub fn daily_reset_due(now: &DateTime<Local>, last_reset_date: Option<&str>) -> bool {
    let Some(boundary) = daily_boundary(now) else {
        return false;
    };
    *now >= boundary && last_reset_date != Some(date_key(now).as_str())
}

/// Prune entries logged before today's boundary from today's bucket.
///
/// Returns the number of pruned entries. Buckets for other dates and the
/// yearly mirror are left alone.
pub fn apply_daily_reset(state: &mut LedgerState, now: &DateTime<Local>) -> usize {
    if !daily_reset_due(now, state.last_reset_date.as_deref()) {
        return 0;
    }
    let Some(boundary) = daily_boundary(now) else {
        return 0;
    };
    let boundary_ms = boundary.timestamp_millis();
    let today = date_key(now);

    let mut pruned = 0;
    if let Some(bucket) = state.daily.get_mut(&today) {
        let before = bucket.entries.len();
        bucket.entries.retain(|e| e.timestamp >= boundary_ms);
        pruned = before - bucket.entries.len();
        bucket.recompute_totals();
    }
    state.last_reset_date = Some(today);
    pruned
}

#[must_use]
pub fn quota_reset_due(now_ms: i64, last_reset: Option<i64>) -> bool {
    match last_reset {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= QUOTA_RESET_INTERVAL_MS,
    }
}

/// Zero both counters if the reset interval has elapsed. Returns whether it did.
pub fn apply_quota_reset(quotas: &mut QuotaCounters, now_ms: i64) -> bool {
    if !quota_reset_due(now_ms, quotas.last_reset) {
        return false;
    }
    quotas.photo_analyses = 0;
    quotas.text_analyses = 0;
    quotas.last_reset = Some(now_ms);
    true
}

/// Open an empty bucket for `year` if there is none. Existing years are kept as-is.
pub fn ensure_year_bucket(yearly: &mut BTreeMap<i32, YearlyMirror>, year: i32) -> bool {
    if yearly.contains_key(&year) {
        return false;
    }
    yearly.insert(year, YearlyMirror::new(year));
    true
}

pub fn apply_yearly_rollover(state: &mut LedgerState, now: &DateTime<Local>) -> bool {
    ensure_year_bucket(&mut state.yearly, now.year())
}
