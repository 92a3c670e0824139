//! Domain types shared across the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Decimal places used when canonicalizing coordinates into cache keys.
pub const COORDINATE_PRECISION: i32 = 4;

// ── Location ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Canonical key rounded to 4 decimal places, so near-identical
    /// requests collapse to the same entry.
    pub fn cache_key(&self) -> String {
        format!("{:.4},{:.4}", round_coord(self.lat), round_coord(self.lng))
    }

    /// True when both coordinates round to the same key.
    pub fn same_location(&self, other: &Coordinates) -> bool {
        self.cache_key() == other.cache_key()
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(FetchError::InvalidRequest(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(FetchError::InvalidRequest(format!(
                "longitude {} out of range",
                self.lng
            )));
        }
        Ok(())
    }
}

fn round_coord(v: f64) -> f64 {
    let scale = 10f64.powi(COORDINATE_PRECISION);
    // Adding 0.0 folds -0.0 into 0.0 so both render identically.
    (v * scale).round() / scale + 0.0
}

// ── Readings ──────────────────────────────────────────────────────────

/// A single point-in-time observation at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub location_label: String,
    pub coordinates: Coordinates,
    pub source_name: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub factor_breakdown: BTreeMap<String, f64>,
    /// Provider station identifier, when the provider exposes one.
    #[serde(default)]
    pub station_id: Option<String>,
}

impl Reading {
    /// Whether `self` differs enough from `previous` to notify subscribers.
    pub fn is_material_change(&self, previous: &Reading) -> bool {
        self.value != previous.value
            || self.source_name != previous.source_name
            || self.observed_at != previous.observed_at
    }

    /// Reject payloads that cannot be a real observation.
    pub fn validate(&self, max_plausible_value: f64) -> Result<(), FetchError> {
        if !self.value.is_finite() {
            return Err(FetchError::Validation(format!(
                "non-finite value for {}",
                self.location_label
            )));
        }
        if self.value < 0.0 || self.value > max_plausible_value {
            return Err(FetchError::Validation(format!(
                "value {} outside plausible range [0, {}]",
                self.value, max_plausible_value
            )));
        }
        if self.source_name.trim().is_empty() {
            return Err(FetchError::Validation("missing source name".into()));
        }
        if let Some((factor, v)) = self
            .factor_breakdown
            .iter()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(FetchError::Validation(format!(
                "invalid {} breakdown value {}",
                factor, v
            )));
        }
        Ok(())
    }
}

/// One day of the historical series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub factor_breakdown: BTreeMap<String, f64>,
}

/// A search hit from a provider's station directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSummary {
    pub station_key: String,
    pub name: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub value: Option<f64>,
}

// ── Poller state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// ── Insights ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Worsening,
    #[default]
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayValue {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub category: String,
    pub count: u32,
}

/// Derived statistics over a daily series. Always rebuilt from the full
/// series; the `Default` value is the documented result for an empty one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Insights {
    pub weekly_average: f64,
    pub trend: Trend,
    pub trend_magnitude_pct: f64,
    pub best_day: Option<DayValue>,
    pub worst_day: Option<DayValue>,
    pub dominant_factor: Option<String>,
    pub bucket_counts: Vec<BucketCount>,
    pub breakdown: BTreeMap<String, Vec<f64>>,
}

impl Insights {
    pub fn bucket_count(&self, category: &str) -> u32 {
        self.bucket_counts
            .iter()
            .find(|b| b.category == category)
            .map(|b| b.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub location_label: String,
    pub coordinates: Coordinates,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub series: Vec<DailyPoint>,
    pub insights: Insights,
    pub generated_at: DateTime<Utc>,
    /// Set when the series is a placeholder rather than provider data.
    #[serde(default)]
    pub synthetic: bool,
}
