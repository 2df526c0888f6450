use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerError;

/// Flat field map as stored on the remote user document.
pub type FieldMap = serde_json::Map<String, Value>;

/// Profile fields that live on this device only and never reach a remote diff.
pub const LOCAL_ONLY_FIELDS: &[&str] = &["moodHistory"];

/// Marker appended to every remote write.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

pub const PHOTO_QUOTA_FIELD: &str = "photoAnalysisCount";
pub const TEXT_QUOTA_FIELD: &str = "textAnalysisCount";
pub const QUOTA_RESET_FIELD: &str = "lastQuotaReset";

#[must_use]
pub fn is_local_only(field: &str) -> bool {
    LOCAL_ONLY_FIELDS.contains(&field)
}

// --- Calorie entries ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalorieEntry {
    pub id: String,
    /// Epoch milliseconds, set at insert time.
    pub timestamp: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NewCalorieEntry {
    pub name: String,
    pub tag: Option<String>,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct EntryUpdate {
    pub name: Option<String>,
    pub tag: Option<Option<String>>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub timestamp: Option<i64>,
}

impl EntryUpdate {
    pub fn apply_to(&self, entry: &mut CalorieEntry) {
        if let Some(ref name) = self.name {
            entry.name.clone_from(name);
        }
        if let Some(ref tag) = self.tag {
            entry.tag.clone_from(tag);
        }
        if let Some(v) = self.calories {
            entry.calories = v;
        }
        if let Some(v) = self.protein {
            entry.protein = v;
        }
        if let Some(v) = self.carbs {
            entry.carbs = v;
        }
        if let Some(v) = self.fat {
            entry.fat = v;
        }
        if let Some(ts) = self.timestamp {
            entry.timestamp = ts;
        }
    }
}

// --- Daily / yearly buckets ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyLedger {
    pub date: String,
    pub entries: Vec<CalorieEntry>,
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
}

impl DailyLedger {
    #[must_use]
    pub fn new(date: &str) -> Self {
        Self {
            date: date.to_string(),
            ..Self::default()
        }
    }

    /// Re-derive every total from the current entries.
    pub fn recompute_totals(&mut self) {
        self.total_calories = self.entries.iter().map(|e| e.calories).sum();
        self.total_protein = self.entries.iter().map(|e| e.protein).sum();
        self.total_carbs = self.entries.iter().map(|e| e.carbs).sum();
        self.total_fat = self.entries.iter().map(|e| e.fat).sum();
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&CalorieEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearlyMirror {
    pub year: i32,
    pub entries: Vec<CalorieEntry>,
}

impl YearlyMirror {
    #[must_use]
    pub fn new(year: i32) -> Self {
        Self {
            year,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&CalorieEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub entry_count: usize,
    pub days_logged: usize,
    pub total_calories: f64,
    pub total_protein: f64,
    pub total_carbs: f64,
    pub total_fat: f64,
    pub average_daily_calories: f64,
}

// --- Quotas ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    PhotoAnalysis,
    TextAnalysis,
}

impl QuotaKind {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "photo" | "photo_analysis" => Ok(Self::PhotoAnalysis),
            "text" | "text_analysis" => Ok(Self::TextAnalysis),
            _ => anyhow::bail!("Invalid quota '{s}'. Must be one of: photo, text"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounters {
    pub photo_analyses: u32,
    pub text_analyses: u32,
    /// Epoch milliseconds of the last rollover.
    pub last_reset: Option<i64>,
}

impl QuotaCounters {
    #[must_use]
    pub fn get(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::PhotoAnalysis => self.photo_analyses,
            QuotaKind::TextAnalysis => self.text_analyses,
        }
    }

    pub fn increment(&mut self, kind: QuotaKind) -> u32 {
        let counter = match kind {
            QuotaKind::PhotoAnalysis => &mut self.photo_analyses,
            QuotaKind::TextAnalysis => &mut self.text_analyses,
        };
        *counter = counter.saturating_add(1);
        *counter
    }
}

/// Per-window usage limits shown to the user; increments are never refused.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub photo_analyses: u32,
    pub text_analyses: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            photo_analyses: 3,
            text_analyses: 3,
        }
    }
}

impl QuotaLimits {
    #[must_use]
    pub fn get(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::PhotoAnalysis => self.photo_analyses,
            QuotaKind::TextAnalysis => self.text_analyses,
        }
    }
}

// --- Profile ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub timestamp: i64,
    pub mood: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_calorie_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat_goal: Option<f64>,
    // Derived from weight and height
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmi: Option<f64>,
    pub units: String,
    pub notifications_enabled: bool,
    pub is_premium: bool,
    pub onboarding_complete: bool,
    #[serde(default)]
    pub mood_history: Vec<MoodEntry>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: None,
            age: None,
            gender: None,
            height_cm: None,
            weight_kg: None,
            target_weight_kg: None,
            activity_level: None,
            goal: None,
            daily_calorie_goal: None,
            protein_goal: None,
            carbs_goal: None,
            fat_goal: None,
            bmi: None,
            units: "metric".to_string(),
            notifications_enabled: true,
            is_premium: false,
            onboarding_complete: false,
            mood_history: Vec::new(),
        }
    }
}

impl UserProfile {
    /// Profile fields as they appear on the remote document, minus local-only ones.
    #[must_use]
    pub fn to_sync_fields(&self) -> FieldMap {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => FieldMap::new(),
        };
        fields.retain(|k, v| !is_local_only(k) && !v.is_null());
        fields
    }

    pub fn recompute_derived(&mut self) {
        self.bmi = match (self.weight_kg, self.height_cm) {
            (Some(w), Some(h)) => compute_bmi(w, h),
            _ => None,
        };
    }
}

/// Body-mass index rounded to one decimal place.
#[must_use]
pub fn compute_bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if weight_kg <= 0.0 || height_cm <= 0.0 {
        return None;
    }
    let m = height_cm / 100.0;
    Some((weight_kg / (m * m) * 10.0).round() / 10.0)
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub target_weight_kg: Option<f64>,
    pub activity_level: Option<String>,
    pub goal: Option<String>,
    pub daily_calorie_goal: Option<f64>,
    pub protein_goal: Option<f64>,
    pub carbs_goal: Option<f64>,
    pub fat_goal: Option<f64>,
    pub units: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub is_premium: Option<bool>,
    pub onboarding_complete: Option<bool>,
}

impl ProfilePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.height_cm.is_none()
            && self.weight_kg.is_none()
            && self.target_weight_kg.is_none()
            && self.activity_level.is_none()
            && self.goal.is_none()
            && self.daily_calorie_goal.is_none()
            && self.protein_goal.is_none()
            && self.carbs_goal.is_none()
            && self.fat_goal.is_none()
            && self.units.is_none()
            && self.notifications_enabled.is_none()
            && self.is_premium.is_none()
            && self.onboarding_complete.is_none()
    }

    pub fn apply_to(&self, profile: &mut UserProfile) {
        fn set<T: Clone>(dst: &mut Option<T>, src: Option<&T>) {
            if let Some(v) = src {
                *dst = Some(v.clone());
            }
        }
        set(&mut profile.name, self.name.as_ref());
        set(&mut profile.age, self.age.as_ref());
        set(&mut profile.gender, self.gender.as_ref());
        set(&mut profile.height_cm, self.height_cm.as_ref());
        set(&mut profile.weight_kg, self.weight_kg.as_ref());
        set(&mut profile.target_weight_kg, self.target_weight_kg.as_ref());
        set(&mut profile.activity_level, self.activity_level.as_ref());
        set(&mut profile.goal, self.goal.as_ref());
        set(&mut profile.daily_calorie_goal, self.daily_calorie_goal.as_ref());
        set(&mut profile.protein_goal, self.protein_goal.as_ref());
        set(&mut profile.carbs_goal, self.carbs_goal.as_ref());
        set(&mut profile.fat_goal, self.fat_goal.as_ref());
        if let Some(ref units) = self.units {
            profile.units.clone_from(units);
        }
        if let Some(v) = self.notifications_enabled {
            profile.notifications_enabled = v;
        }
        if let Some(v) = self.is_premium {
            profile.is_premium = v;
        }
        if let Some(v) = self.onboarding_complete {
            profile.onboarding_complete = v;
        }
    }
}

// --- Persisted state ---

/// Everything the ledger keeps in its local durable blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub profile: Option<UserProfile>,
    #[serde(default)]
    pub daily: BTreeMap<String, DailyLedger>,
    #[serde(default)]
    pub custom_tags: Vec<String>,
    #[serde(default)]
    pub quotas: QuotaCounters,
    #[serde(default)]
    pub yearly: BTreeMap<i32, YearlyMirror>,
    #[serde(default)]
    pub last_reset_date: Option<String>,
}

impl LedgerState {
    /// The profile subset that synchronizes: profile fields plus quota counters.
    #[must_use]
    pub fn sync_fields(&self) -> FieldMap {
        let mut fields = self
            .profile
            .as_ref()
            .map(UserProfile::to_sync_fields)
            .unwrap_or_default();
        fields.insert(
            PHOTO_QUOTA_FIELD.to_string(),
            Value::from(self.quotas.photo_analyses),
        );
        fields.insert(
            TEXT_QUOTA_FIELD.to_string(),
            Value::from(self.quotas.text_analyses),
        );
        if let Some(ts) = self.quotas.last_reset {
            fields.insert(QUOTA_RESET_FIELD.to_string(), Value::from(ts));
        }
        fields
    }
}

// --- Validation ---

fn check_amount(label: &str, value: f64) -> Result<(), LedgerError> {
    if !value.is_finite() {
        return Err(LedgerError::validation(format!("{label} must be a number")));
    }
    if value < 0.0 {
        return Err(LedgerError::validation(format!(
            "{label} must be non-negative (got {value})"
        )));
    }
    Ok(())
}

fn check_positive(label: &str, value: Option<f64>) -> Result<(), LedgerError> {
    if let Some(v) = value {
        if !v.is_finite() || v <= 0.0 {
            return Err(LedgerError::validation(format!(
                "{label} must be greater than 0"
            )));
        }
    }
    Ok(())
}

pub fn validate_new_entry(entry: &NewCalorieEntry) -> Result<(), LedgerError> {
    if entry.name.trim().is_empty() {
        return Err(LedgerError::validation("Entry name must not be empty"));
    }
    check_amount("calories", entry.calories)?;
    check_amount("protein", entry.protein)?;
    check_amount("carbs", entry.carbs)?;
    check_amount("fat", entry.fat)?;
    Ok(())
}

pub fn validate_entry_update(update: &EntryUpdate) -> Result<(), LedgerError> {
    if let Some(ref name) = update.name {
        if name.trim().is_empty() {
            return Err(LedgerError::validation("Entry name must not be empty"));
        }
    }
    for (label, value) in [
        ("calories", update.calories),
        ("protein", update.protein),
        ("carbs", update.carbs),
        ("fat", update.fat),
    ] {
        if let Some(v) = value {
            check_amount(label, v)?;
        }
    }
    Ok(())
}

pub fn validate_profile_patch(patch: &ProfilePatch) -> Result<(), LedgerError> {
    check_positive("height", patch.height_cm)?;
    check_positive("weight", patch.weight_kg)?;
    check_positive("target weight", patch.target_weight_kg)?;
    for (label, value) in [
        ("calorie goal", patch.daily_calorie_goal),
        ("protein goal", patch.protein_goal),
        ("carbs goal", patch.carbs_goal),
        ("fat goal", patch.fat_goal),
    ] {
        if let Some(v) = value {
            check_amount(label, v)?;
        }
    }
    if let Some(ref units) = patch.units {
        if units != "metric" && units != "imperial" {
            return Err(LedgerError::validation(format!(
                "Invalid units '{units}'. Must be one of: metric, imperial"
            )));
        }
    }
    Ok(())
}
