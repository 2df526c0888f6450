use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use chrono::Datelike;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock, date_key, local_datetime};
use crate::error::LedgerError;
use crate::models::{
    CalorieEntry, DailyLedger, EntryUpdate, FieldMap, LedgerState, MoodEntry, NewCalorieEntry,
    ProfilePatch, QuotaCounters, QuotaKind, QuotaLimits, UserProfile, YearSummary, YearlyMirror,
    validate_entry_update, validate_new_entry, validate_profile_patch,
};
use crate::reset;
use crate::storage::{BlobStore, LedgerStorage};

/// Receives the syncable profile subset after every profile or quota mutation.
///
/// Called synchronously from inside the mutation, so implementations must
/// not block.
pub trait LedgerObserver: Send + Sync {
    fn profile_changed(&self, fields: &FieldMap);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub pruned_entries: usize,
    pub quota_reset: bool,
    pub year_opened: bool,
}

pub struct LedgerStore {
    state: LedgerState,
    storage: Box<dyn LedgerStorage>,
    clock: Arc<dyn Clock>,
    limits: QuotaLimits,
    observers: Vec<Arc<dyn LedgerObserver>>,
    storage_warning: Option<LedgerError>,
}

impl LedgerStore {
    /// Load the ledger from `storage`, starting empty if nothing was saved yet.
    pub fn open(storage: Box<dyn LedgerStorage>, clock: Arc<dyn Clock>) -> Result<Self> {
        let state = storage.load()?.unwrap_or_default();
        Ok(Self {
            state,
            storage,
            clock,
            limits: QuotaLimits::default(),
            observers: Vec::new(),
            storage_warning: None,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(Box::new(BlobStore::open_in_memory()?), Arc::new(SystemClock))
    }

    pub fn subscribe(&mut self, observer: Arc<dyn LedgerObserver>) {
        self.observers.push(observer);
    }

    // --- Reads ---

    #[must_use]
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        self.state.profile.as_ref()
    }

    #[must_use]
    pub fn daily(&self, date: &str) -> Option<&DailyLedger> {
        self.state.daily.get(date)
    }

    #[must_use]
    pub fn today(&self) -> Option<&DailyLedger> {
        self.state.daily.get(&date_key(&self.clock.now()))
    }

    #[must_use]
    pub fn year(&self, year: i32) -> Option<&YearlyMirror> {
        self.state.yearly.get(&year)
    }

    #[must_use]
    pub fn custom_tags(&self) -> &[String] {
        &self.state.custom_tags
    }

    #[must_use]
    pub fn sync_fields(&self) -> FieldMap {
        self.state.sync_fields()
    }

    /// Last local-storage failure, cleared by the next successful write.
    #[must_use]
    pub fn storage_warning(&self) -> Option<&LedgerError> {
        self.storage_warning.as_ref()
    }

    // --- Entries ---

    /// Log an entry into today's bucket and the current year's mirror.
    pub fn add_entry(&mut self, new: &NewCalorieEntry) -> Result<CalorieEntry, LedgerError> {
        validate_new_entry(new)?;

        let now = self.clock.now();
        let pruned = reset::apply_daily_reset(&mut self.state, &now);
        if pruned > 0 {
            debug!(pruned, "daily reset pruned entries before boundary");
        }
        reset::apply_yearly_rollover(&mut self.state, &now);

        let entry = CalorieEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: now.timestamp_millis(),
            name: new.name.trim().to_string(),
            tag: new.tag.clone(),
            calories: new.calories,
            protein: new.protein,
            carbs: new.carbs,
            fat: new.fat,
        };

        let today = date_key(&now);
        let bucket = self
            .state
            .daily
            .entry(today.clone())
            .or_insert_with(|| DailyLedger::new(&today));
        bucket.entries.push(entry.clone());
        bucket.recompute_totals();

        let year = now.year();
        self.state
            .yearly
            .entry(year)
            .or_insert_with(|| YearlyMirror::new(year))
            .entries
            .push(entry.clone());

        self.persist();
        debug!(id = %entry.id, date = %today, "entry added");
        Ok(entry)
    }

    /// Apply `update` to the entry in both its daily bucket and its yearly mirror.
    ///
    /// Returns `Ok(None)` when `(date, id)` is unknown. A new timestamp on
    /// another day moves the entry into that day's bucket. Moving an entry
    /// into another calendar year is rejected.
    pub fn edit_entry(
        &mut self,
        date: &str,
        id: &str,
        update: &EntryUpdate,
    ) -> Result<Option<CalorieEntry>, LedgerError> {
        let Some(current) = self.state.daily.get(date).and_then(|b| b.find(id)) else {
            return Ok(None);
        };
        validate_entry_update(update)?;

        let year = entry_year(current.timestamp)?;
        let target = match update.timestamp {
            Some(ts) => {
                let dt = local_datetime(ts)
                    .ok_or_else(|| LedgerError::validation(format!("Invalid timestamp {ts}")))?;
                if dt.year() != year {
                    return Err(LedgerError::validation(
                        "Moving an entry into a different year is not supported",
                    ));
                }
                date_key(&dt)
            }
            None => date.to_string(),
        };

        let mut updated = current.clone();
        update.apply_to(&mut updated);

        if let Some(bucket) = self.state.daily.get_mut(date) {
            if target == date {
                if let Some(entry) = bucket.entries.iter_mut().find(|e| e.id == id) {
                    *entry = updated.clone();
                }
            } else {
                bucket.entries.retain(|e| e.id != id);
            }
            bucket.recompute_totals();
        }
        if target != date {
            let bucket = self
                .state
                .daily
                .entry(target.clone())
                .or_insert_with(|| DailyLedger::new(&target));
            let pos = bucket
                .entries
                .partition_point(|e| e.timestamp <= updated.timestamp);
            bucket.entries.insert(pos, updated.clone());
            bucket.recompute_totals();
            debug!(id, from = date, to = %target, "entry moved to another day");
        }

        let mirror = self
            .state
            .yearly
            .entry(year)
            .or_insert_with(|| YearlyMirror::new(year));
        match mirror.entries.iter_mut().find(|e| e.id == id) {
            Some(copy) => *copy = updated.clone(),
            None => mirror.entries.push(updated.clone()),
        }

        self.persist();
        Ok(Some(updated))
    }

    pub fn remove_entry(&mut self, date: &str, id: &str) -> Option<CalorieEntry> {
        let bucket = self.state.daily.get_mut(date)?;
        let pos = bucket.entries.iter().position(|e| e.id == id)?;
        let removed = bucket.entries.remove(pos);
        bucket.recompute_totals();

        if let Some(year) = local_datetime(removed.timestamp).map(|dt| dt.year()) {
            if let Some(mirror) = self.state.yearly.get_mut(&year) {
                mirror.entries.retain(|e| e.id != id);
            }
        }

        self.persist();
        Some(removed)
    }

    // --- Profile ---

    /// Merge `patch` into the profile, creating one with defaults if needed.
    ///
    /// Derived fields are recomputed before anything is persisted or
    /// broadcast.
    pub fn update_profile(&mut self, patch: &ProfilePatch) -> Result<UserProfile, LedgerError> {
        validate_profile_patch(patch)?;

        let profile = self.state.profile.get_or_insert_with(UserProfile::default);
        patch.apply_to(profile);
        profile.recompute_derived();
        let updated = profile.clone();

        self.persist();
        self.notify_observers();
        Ok(updated)
    }

    /// Append to the local-only mood history. Never synchronized.
    pub fn record_mood(&mut self, mood: &str) -> Result<(), LedgerError> {
        let mood = mood.trim();
        if mood.is_empty() {
            return Err(LedgerError::validation("Mood must not be empty"));
        }
        let timestamp = self.clock.now_millis();
        self.state
            .profile
            .get_or_insert_with(UserProfile::default)
            .mood_history
            .push(MoodEntry {
                timestamp,
                mood: mood.to_string(),
            });
        self.persist();
        Ok(())
    }

    /// Drop the profile and quota counters. Ledger history stays on the device.
    pub fn sign_out(&mut self) {
        self.state.profile = None;
        self.state.quotas = QuotaCounters::default();
        self.persist();
    }

    // --- Quotas ---

    pub fn increment_quota(&mut self, kind: QuotaKind) -> u32 {
        let now_ms = self.clock.now_millis();
        if reset::apply_quota_reset(&mut self.state.quotas, now_ms) {
            debug!("quota window rolled over");
        }
        let count = self.state.quotas.increment(kind);
        self.persist();
        self.notify_observers();
        count
    }

    /// Uses counted in the current window, treating an overdue rollover as done.
    #[must_use]
    pub fn quota_used(&self, kind: QuotaKind) -> u32 {
        if reset::quota_reset_due(self.clock.now_millis(), self.state.quotas.last_reset) {
            return 0;
        }
        self.state.quotas.get(kind)
    }

    #[must_use]
    pub fn quota_limit(&self, kind: QuotaKind) -> u32 {
        self.limits.get(kind)
    }

    #[must_use]
    pub fn quota_remaining(&self, kind: QuotaKind) -> u32 {
        self.quota_limit(kind).saturating_sub(self.quota_used(kind))
    }

    // --- Tags ---

    pub fn add_custom_tag(&mut self, tag: &str) -> Result<bool, LedgerError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(LedgerError::validation("Tag must not be empty"));
        }
        if self.state.custom_tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        self.state.custom_tags.push(tag.to_string());
        self.persist();
        Ok(true)
    }

    pub fn remove_custom_tag(&mut self, tag: &str) -> bool {
        let before = self.state.custom_tags.len();
        self.state.custom_tags.retain(|t| t != tag.trim());
        let removed = self.state.custom_tags.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    // --- Maintenance ---

    /// Run every reset check, e.g. when the app returns to the foreground.
    pub fn run_maintenance(&mut self) -> MaintenanceReport {
        let now = self.clock.now();
        let marker_before = self.state.last_reset_date.clone();
        let report = MaintenanceReport {
            pruned_entries: reset::apply_daily_reset(&mut self.state, &now),
            quota_reset: reset::apply_quota_reset(&mut self.state.quotas, now.timestamp_millis()),
            year_opened: reset::apply_yearly_rollover(&mut self.state, &now),
        };

        if report != MaintenanceReport::default() || marker_before != self.state.last_reset_date
        {
            self.persist();
        }
        if report.quota_reset {
            self.notify_observers();
        }
        report
    }

    // --- History ---

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn year_summary(&self, year: i32) -> YearSummary {
        let entries = self
            .state
            .yearly
            .get(&year)
            .map(|m| m.entries.as_slice())
            .unwrap_or_default();

        let days: BTreeSet<String> = entries
            .iter()
            .filter_map(|e| local_datetime(e.timestamp))
            .map(|dt| date_key(&dt))
            .collect();

        let total_calories: f64 = entries.iter().map(|e| e.calories).sum();
        let average_daily_calories = if days.is_empty() {
            0.0
        } else {
            total_calories / days.len() as f64
        };

        YearSummary {
            year,
            entry_count: entries.len(),
            days_logged: days.len(),
            total_calories,
            total_protein: entries.iter().map(|e| e.protein).sum(),
            total_carbs: entries.iter().map(|e| e.carbs).sum(),
            total_fat: entries.iter().map(|e| e.fat).sum(),
            average_daily_calories,
        }
    }

    /// Write one year of the mirror as CSV. Returns the number of rows written.
    pub fn export_year_csv<W: io::Write>(&self, year: i32, writer: W) -> Result<usize> {
        #[derive(Serialize)]
        struct ExportRow<'a> {
            id: &'a str,
            date: String,
            time: String,
            name: &'a str,
            tag: &'a str,
            calories: f64,
            protein: f64,
            carbs: f64,
            fat: f64,
        }

        let mut wtr = csv::Writer::from_writer(writer);
        let mut count = 0;
        if let Some(mirror) = self.state.yearly.get(&year) {
            for e in &mirror.entries {
                let Some(dt) = local_datetime(e.timestamp) else {
                    continue;
                };
                wtr.serialize(ExportRow {
                    id: &e.id,
                    date: date_key(&dt),
                    time: dt.format("%H:%M").to_string(),
                    name: &e.name,
                    tag: e.tag.as_deref().unwrap_or(""),
                    calories: e.calories,
                    protein: e.protein,
                    carbs: e.carbs,
                    fat: e.fat,
                })?;
                count += 1;
            }
        }
        wtr.flush()?;
        Ok(count)
    }

    // --- Internals ---

    fn persist(&mut self) {
        match self.storage.save(&self.state) {
            Ok(()) => self.storage_warning = None,
            Err(e) => {
                let msg = format!("{e:#}");
                warn!(error = %msg, "local storage write failed; in-memory ledger stays authoritative");
                self.storage_warning = Some(LedgerError::StorageUnavailable(msg));
            }
        }
    }

    fn notify_observers(&self) {
        if self.observers.is_empty() {
            return;
        }
        let fields = self.state.sync_fields();
        for observer in &self.observers {
            observer.profile_changed(&fields);
        }
    }
}

fn entry_year(timestamp: i64) -> Result<i32, LedgerError> {
    local_datetime(timestamp)
        .map(|dt| dt.year())
        .ok_or_else(|| LedgerError::validation(format!("Invalid timestamp {timestamp}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::PHOTO_QUOTA_FIELD;
    use crate::reset::QUOTA_RESET_INTERVAL_MS;
    use chrono::{DateTime, Local, TimeDelta, TimeZone};
    use std::sync::Mutex;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn ledger_at(now: DateTime<Local>) -> (LedgerStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = BlobStore::open_in_memory().unwrap();
        let ledger = LedgerStore::open(Box::new(store), clock.clone()).unwrap();
        (ledger, clock)
    }

    fn ledger_with_state(state: &LedgerState, now: DateTime<Local>) -> (LedgerStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = BlobStore::open_in_memory().unwrap();
        store.save(state).unwrap();
        let ledger = LedgerStore::open(Box::new(store), clock.clone()).unwrap();
        (ledger, clock)
    }

    fn meal(name: &str, calories: f64, protein: f64, carbs: f64, fat: f64) -> NewCalorieEntry {
        NewCalorieEntry {
            name: name.to_string(),
            tag: None,
            calories,
            protein,
            carbs,
            fat,
        }
    }

    fn assert_consistent(ledger: &LedgerStore) {
        for day in ledger.state().daily.values() {
            let sum = |f: fn(&CalorieEntry) -> f64| day.entries.iter().map(f).sum::<f64>();
            assert!((day.total_calories - sum(|e| e.calories)).abs() < 1e-9);
            assert!((day.total_protein - sum(|e| e.protein)).abs() < 1e-9);
            assert!((day.total_carbs - sum(|e| e.carbs)).abs() < 1e-9);
            assert!((day.total_fat - sum(|e| e.fat)).abs() < 1e-9);

            for e in &day.entries {
                let year = local_datetime(e.timestamp).unwrap().year();
                let copies: Vec<&CalorieEntry> = ledger
                    .state()
                    .yearly
                    .values()
                    .flat_map(|m| m.entries.iter())
                    .filter(|m| m.id == e.id)
                    .collect();
                assert_eq!(copies.len(), 1, "entry must be mirrored exactly once");
                assert_eq!(copies[0], e);
                assert!(ledger.year(year).unwrap().find(&e.id).is_some());
            }
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        calls: Mutex<Vec<FieldMap>>,
    }

    impl LedgerObserver for RecordingObserver {
        fn profile_changed(&self, fields: &FieldMap) {
            self.calls.lock().unwrap().push(fields.clone());
        }
    }

    struct FailingStorage;

    impl LedgerStorage for FailingStorage {
        fn load(&self) -> Result<Option<LedgerState>> {
            Ok(None)
        }

        fn save(&self, _state: &LedgerState) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_add_two_entries_then_remove_first() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let first = ledger.add_entry(&meal("Bowl", 300.0, 20.0, 30.0, 10.0)).unwrap();
        ledger.add_entry(&meal("Wrap", 200.0, 15.0, 25.0, 5.0)).unwrap();

        let day = ledger.daily("2024-06-15").unwrap();
        assert_eq!(day.entries.len(), 2);
        assert!((day.total_calories - 500.0).abs() < f64::EPSILON);
        assert!((day.total_protein - 35.0).abs() < f64::EPSILON);
        assert!((day.total_carbs - 55.0).abs() < f64::EPSILON);
        assert!((day.total_fat - 15.0).abs() < f64::EPSILON);

        let removed = ledger.remove_entry("2024-06-15", &first.id).unwrap();
        assert_eq!(removed.id, first.id);

        let day = ledger.daily("2024-06-15").unwrap();
        assert!((day.total_calories - 200.0).abs() < f64::EPSILON);
        assert!((day.total_protein - 15.0).abs() < f64::EPSILON);
        assert!((day.total_carbs - 25.0).abs() < f64::EPSILON);
        assert!((day.total_fat - 5.0).abs() < f64::EPSILON);
        assert!(ledger.year(2024).unwrap().find(&first.id).is_none());
        assert_consistent(&ledger);
    }

    #[test]
    fn test_add_entry_assigns_unique_ids_and_timestamp() {
        let now = at(2024, 6, 15, 12, 0);
        let (mut ledger, _clock) = ledger_at(now);
        let a = ledger.add_entry(&meal("A", 1.0, 0.0, 0.0, 0.0)).unwrap();
        let b = ledger.add_entry(&meal("A", 1.0, 0.0, 0.0, 0.0)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.timestamp, now.timestamp_millis());
        // Insertion order is preserved
        let ids: Vec<&str> = ledger.daily("2024-06-15").unwrap().entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
    }

    #[test]
    fn test_add_entry_rejects_negative_values() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let err = ledger
            .add_entry(&meal("Bad", -1.0, 0.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(ledger.state().daily.is_empty());
        assert!(ledger.state().yearly.is_empty());
    }

    #[test]
    fn test_aggregates_hold_across_mixed_sequence() {
        let (mut ledger, clock) = ledger_at(at(2024, 6, 15, 8, 0));
        let mut ids = Vec::new();
        for i in 0..5 {
            let e = ledger
                .add_entry(&meal("Item", f64::from(i) * 100.0, 5.0, 10.0, 2.0))
                .unwrap();
            ids.push(e.id);
            clock.advance(TimeDelta::minutes(30));
            assert_consistent(&ledger);
        }
        ledger
            .edit_entry(
                "2024-06-15",
                &ids[1],
                &EntryUpdate {
                    calories: Some(999.0),
                    fat: Some(0.0),
                    ..EntryUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_consistent(&ledger);
        ledger.remove_entry("2024-06-15", &ids[3]);
        assert_consistent(&ledger);
        ledger.remove_entry("2024-06-15", &ids[0]);
        assert_consistent(&ledger);

        let day = ledger.daily("2024-06-15").unwrap();
        assert_eq!(day.entries.len(), 3);
        assert!((day.total_calories - (999.0 + 200.0 + 400.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_edit_updates_mirror_copy() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let e = ledger.add_entry(&meal("Rice", 200.0, 4.0, 44.0, 0.5)).unwrap();

        let updated = ledger
            .edit_entry(
                "2024-06-15",
                &e.id,
                &EntryUpdate {
                    name: Some("Brown rice".to_string()),
                    calories: Some(220.0),
                    ..EntryUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Brown rice");

        let mirrored = ledger.year(2024).unwrap().find(&e.id).unwrap();
        assert_eq!(mirrored, &updated);
        assert!((ledger.daily("2024-06-15").unwrap().total_calories - 220.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_edit_unknown_is_noop() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let e = ledger.add_entry(&meal("Rice", 200.0, 4.0, 44.0, 0.5)).unwrap();
        let update = EntryUpdate {
            calories: Some(1.0),
            ..EntryUpdate::default()
        };
        assert!(ledger.edit_entry("2024-06-14", &e.id, &update).unwrap().is_none());
        assert!(ledger.edit_entry("2024-06-15", "nope", &update).unwrap().is_none());
        assert!(ledger.remove_entry("2024-06-15", "nope").is_none());
        assert!((ledger.daily("2024-06-15").unwrap().total_calories - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_edit_rejects_cross_year_timestamp() {
        let (mut ledger, _clock) = ledger_at(at(2024, 12, 31, 20, 0));
        let e = ledger.add_entry(&meal("Cake", 400.0, 5.0, 50.0, 20.0)).unwrap();

        let next_year = EntryUpdate {
            timestamp: Some(at(2025, 1, 1, 0, 30).timestamp_millis()),
            ..EntryUpdate::default()
        };
        let err = ledger.edit_entry("2024-12-31", &e.id, &next_year).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.year(2024).unwrap().find(&e.id).unwrap().timestamp, e.timestamp);

        let same_year = EntryUpdate {
            timestamp: Some(at(2024, 12, 31, 19, 0).timestamp_millis()),
            ..EntryUpdate::default()
        };
        let moved = ledger.edit_entry("2024-12-31", &e.id, &same_year).unwrap().unwrap();
        assert_eq!(moved.timestamp, at(2024, 12, 31, 19, 0).timestamp_millis());
        assert_consistent(&ledger);
    }

    #[test]
    fn test_edit_to_another_day_moves_bucket() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let keep = ledger.add_entry(&meal("Toast", 120.0, 4.0, 20.0, 2.0)).unwrap();
        let e = ledger.add_entry(&meal("Soup", 300.0, 10.0, 30.0, 8.0)).unwrap();

        let earlier = at(2024, 3, 1, 9, 0).timestamp_millis();
        let moved = ledger
            .edit_entry(
                "2024-06-15",
                &e.id,
                &EntryUpdate {
                    timestamp: Some(earlier),
                    ..EntryUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(moved.timestamp, earlier);

        let june = ledger.daily("2024-06-15").unwrap();
        assert!(june.find(&e.id).is_none());
        assert!(june.find(&keep.id).is_some());
        assert!((june.total_calories - 120.0).abs() < f64::EPSILON);

        let march = ledger.daily("2024-03-01").unwrap();
        assert_eq!(march.find(&e.id).unwrap(), &moved);
        assert!((march.total_calories - 300.0).abs() < f64::EPSILON);

        assert_eq!(ledger.year(2024).unwrap().find(&e.id).unwrap(), &moved);
        assert_eq!(ledger.year(2024).unwrap().entries.len(), 2);
        assert_consistent(&ledger);

        // The old (date, id) pair no longer resolves.
        assert!(ledger
            .edit_entry("2024-06-15", &e.id, &EntryUpdate::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_edit_of_unknown_entry_is_noop() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        ledger.add_entry(&meal("Rice", 200.0, 4.0, 44.0, 0.5)).unwrap();
        let invalid = EntryUpdate {
            calories: Some(-5.0),
            ..EntryUpdate::default()
        };
        assert!(ledger.edit_entry("2024-06-15", "nope", &invalid).unwrap().is_none());
        assert!(ledger.edit_entry("2023-01-01", "nope", &invalid).unwrap().is_none());
    }

    #[test]
    fn test_add_entry_runs_daily_reset() {
        let mut state = LedgerState {
            last_reset_date: Some("2024-06-14".to_string()),
            ..LedgerState::default()
        };
        let early = CalorieEntry {
            id: "early".to_string(),
            timestamp: at(2024, 6, 15, 3, 50).timestamp_millis(),
            name: "Midnight snack".to_string(),
            tag: None,
            calories: 150.0,
            protein: 1.0,
            carbs: 1.0,
            fat: 1.0,
        };
        let mut today = DailyLedger::new("2024-06-15");
        today.entries.push(early.clone());
        today.recompute_totals();
        state.daily.insert("2024-06-15".to_string(), today);
        let mut mirror = YearlyMirror::new(2024);
        mirror.entries.push(early);
        state.yearly.insert(2024, mirror);

        let (mut ledger, _clock) = ledger_with_state(&state, at(2024, 6, 15, 4, 5));
        ledger.add_entry(&meal("Breakfast", 350.0, 20.0, 40.0, 10.0)).unwrap();

        let day = ledger.daily("2024-06-15").unwrap();
        assert_eq!(day.entries.len(), 1);
        assert_eq!(day.entries[0].name, "Breakfast");
        assert!((day.total_calories - 350.0).abs() < f64::EPSILON);
        // History keeps the pruned entry
        assert!(ledger.year(2024).unwrap().find("early").is_some());
        assert_eq!(ledger.state().last_reset_date.as_deref(), Some("2024-06-15"));
    }

    #[test]
    fn test_add_entry_opens_new_year_bucket() {
        let (mut ledger, clock) = ledger_at(at(2024, 12, 31, 12, 0));
        ledger.add_entry(&meal("Lunch", 500.0, 1.0, 1.0, 1.0)).unwrap();
        clock.set(at(2025, 1, 1, 12, 0));
        ledger.add_entry(&meal("Lunch", 450.0, 1.0, 1.0, 1.0)).unwrap();

        assert_eq!(ledger.year(2024).unwrap().entries.len(), 1);
        assert_eq!(ledger.year(2025).unwrap().entries.len(), 1);
        assert_consistent(&ledger);
    }

    #[test]
    fn test_update_profile_creates_defaults_and_derives_bmi() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        assert!(ledger.profile().is_none());

        let profile = ledger
            .update_profile(&ProfilePatch {
                height_cm: Some(180.0),
                ..ProfilePatch::default()
            })
            .unwrap();
        assert_eq!(profile.units, "metric");
        assert!(profile.bmi.is_none());

        let profile = ledger
            .update_profile(&ProfilePatch {
                weight_kg: Some(81.0),
                ..ProfilePatch::default()
            })
            .unwrap();
        assert_eq!(profile.bmi, Some(25.0));
        assert_eq!(ledger.profile().unwrap().bmi, Some(25.0));
    }

    #[test]
    fn test_update_profile_rejects_invalid_patch() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let err = ledger
            .update_profile(&ProfilePatch {
                weight_kg: Some(-5.0),
                ..ProfilePatch::default()
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(ledger.profile().is_none());
    }

    #[test]
    fn test_observers_see_profile_and_quota_changes_only() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        let observer = Arc::new(RecordingObserver::default());
        ledger.subscribe(observer.clone());

        ledger.add_entry(&meal("Lunch", 500.0, 1.0, 1.0, 1.0)).unwrap();
        ledger.record_mood("tired").unwrap();
        ledger.add_custom_tag("cheat day").unwrap();
        assert!(observer.calls.lock().unwrap().is_empty());

        ledger
            .update_profile(&ProfilePatch {
                weight_kg: Some(70.0),
                ..ProfilePatch::default()
            })
            .unwrap();
        ledger.increment_quota(QuotaKind::PhotoAnalysis);

        let calls = observer.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["weightKg"], 70.0);
        assert!(!calls[0].contains_key("moodHistory"));
        assert_eq!(calls[1][PHOTO_QUOTA_FIELD], 1);
    }

    #[test]
    fn test_quota_rolls_over_before_increment() {
        let t = at(2024, 6, 15, 12, 0);
        let state = LedgerState {
            quotas: QuotaCounters {
                photo_analyses: 2,
                text_analyses: 0,
                last_reset: Some(t.timestamp_millis()),
            },
            ..LedgerState::default()
        };
        let (mut ledger, clock) = ledger_with_state(&state, t);

        assert_eq!(ledger.increment_quota(QuotaKind::PhotoAnalysis), 3);
        assert_eq!(ledger.quota_remaining(QuotaKind::PhotoAnalysis), 0);

        clock.advance(TimeDelta::hours(6) + TimeDelta::minutes(1));
        assert_eq!(ledger.quota_remaining(QuotaKind::PhotoAnalysis), 3);
        assert_eq!(ledger.increment_quota(QuotaKind::PhotoAnalysis), 1);
        assert_eq!(
            ledger.state().quotas.last_reset,
            Some(clock.now_millis())
        );
    }

    #[test]
    fn test_quota_no_rollover_inside_window() {
        let t = at(2024, 6, 15, 12, 0);
        let (mut ledger, clock) = ledger_at(t);
        assert_eq!(ledger.increment_quota(QuotaKind::TextAnalysis), 1);
        clock.advance(TimeDelta::milliseconds(QUOTA_RESET_INTERVAL_MS - 1));
        assert_eq!(ledger.increment_quota(QuotaKind::TextAnalysis), 2);
        assert_eq!(ledger.state().quotas.photo_analyses, 0);
    }

    #[test]
    fn test_storage_failure_is_non_fatal() {
        let clock = Arc::new(ManualClock::new(at(2024, 6, 15, 12, 0)));
        let mut ledger = LedgerStore::open(Box::new(FailingStorage), clock).unwrap();

        let entry = ledger.add_entry(&meal("Soup", 120.0, 6.0, 12.0, 4.0)).unwrap();
        assert!(ledger.daily("2024-06-15").unwrap().find(&entry.id).is_some());
        assert!(matches!(
            ledger.storage_warning(),
            Some(LedgerError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_reopen_reads_back_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let clock = Arc::new(ManualClock::new(at(2024, 6, 15, 12, 0)));

        let entry = {
            let mut ledger =
                LedgerStore::open(Box::new(BlobStore::open(&path).unwrap()), clock.clone()).unwrap();
            ledger
                .update_profile(&ProfilePatch {
                    name: Some("Sam".to_string()),
                    ..ProfilePatch::default()
                })
                .unwrap();
            ledger.add_entry(&meal("Eggs", 155.0, 13.0, 1.0, 11.0)).unwrap()
        };

        let ledger = LedgerStore::open(Box::new(BlobStore::open(&path).unwrap()), clock).unwrap();
        assert_eq!(ledger.profile().unwrap().name.as_deref(), Some("Sam"));
        assert_eq!(ledger.today().unwrap().find(&entry.id), Some(&entry));
    }

    #[test]
    fn test_sign_out_keeps_history() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        ledger
            .update_profile(&ProfilePatch {
                weight_kg: Some(70.0),
                ..ProfilePatch::default()
            })
            .unwrap();
        ledger.add_entry(&meal("Lunch", 500.0, 1.0, 1.0, 1.0)).unwrap();
        ledger.increment_quota(QuotaKind::TextAnalysis);

        ledger.sign_out();
        assert!(ledger.profile().is_none());
        assert_eq!(ledger.state().quotas, QuotaCounters::default());
        assert_eq!(ledger.daily("2024-06-15").unwrap().entries.len(), 1);
        assert_eq!(ledger.year(2024).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_custom_tags() {
        let (mut ledger, _clock) = ledger_at(at(2024, 6, 15, 12, 0));
        assert!(ledger.add_custom_tag("pre-workout").unwrap());
        assert!(!ledger.add_custom_tag(" pre-workout ").unwrap());
        assert!(ledger.add_custom_tag("").is_err());
        assert_eq!(ledger.custom_tags(), ["pre-workout".to_string()]);
        assert!(ledger.remove_custom_tag("pre-workout"));
        assert!(!ledger.remove_custom_tag("pre-workout"));
    }

    #[test]
    fn test_run_maintenance() {
        let (mut ledger, clock) = ledger_at(at(2024, 6, 15, 3, 0));
        let report = ledger.run_maintenance();
        assert!(report.quota_reset);
        assert!(report.year_opened);
        assert_eq!(ledger.state().last_reset_date, None);

        clock.set(at(2024, 6, 15, 4, 30));
        let report = ledger.run_maintenance();
        assert!(!report.year_opened);
        assert_eq!(ledger.state().last_reset_date.as_deref(), Some("2024-06-15"));
        assert_eq!(ledger.run_maintenance(), MaintenanceReport::default());
    }

    #[test]
    fn test_year_summary_and_csv_export() {
        let (mut ledger, clock) = ledger_at(at(2024, 6, 15, 12, 0));
        ledger.add_entry(&meal("Lunch", 600.0, 30.0, 60.0, 20.0)).unwrap();
        ledger.add_entry(&meal("Dinner", 400.0, 25.0, 30.0, 15.0)).unwrap();
        clock.set(at(2024, 6, 16, 12, 0));
        ledger.add_entry(&meal("Lunch", 500.0, 20.0, 50.0, 10.0)).unwrap();

        let summary = ledger.year_summary(2024);
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.days_logged, 2);
        assert!((summary.total_calories - 1500.0).abs() < f64::EPSILON);
        assert!((summary.average_daily_calories - 750.0).abs() < f64::EPSILON);

        let empty = ledger.year_summary(2019);
        assert_eq!(empty.entry_count, 0);
        assert!(empty.average_daily_calories.abs() < f64::EPSILON);

        let mut out = Vec::new();
        let rows = ledger.export_year_csv(2024, &mut out).unwrap();
        assert_eq!(rows, 3);
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,date,time,name,tag,calories,protein,carbs,fat"
        );
        assert!(lines.next().unwrap().contains(",2024-06-15,12:00,Lunch,,600.0,"));
    }
}
