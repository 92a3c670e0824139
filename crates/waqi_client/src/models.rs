//! WAQI wire format and its mapping onto the shared types.
//!
//! Every response is `{"status": "ok" | "error", "data": ...}`. On error,
//! `data` is a bare string such as `"Invalid key"`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use common::{Coordinates, DailyPoint, FetchError, Reading, StationSummary};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Sub-indices that count as pollutants. WAQI also reports weather
/// (`t`, `h`, `p`, `w`, ...) under `iaqi`; those are ignored.
pub const POLLUTANTS: [&str; 6] = ["pm25", "pm10", "o3", "no2", "so2", "co"];

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Unwrap `data` into `T`, mapping `status: "error"` onto a `FetchError`.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        if self.status != "ok" {
            let message = match &self.data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(classify_api_error(&message));
        }
        serde_json::from_value(self.data)
            .map_err(|e| FetchError::Validation(format!("unexpected payload shape: {}", e)))
    }
}

/// Map WAQI's in-band error strings.
pub fn classify_api_error(message: &str) -> FetchError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid key") || lower.contains("token") {
        FetchError::Unauthorized(message.to_string())
    } else if lower.contains("over quota") {
        FetchError::RateLimited {
            retry_after_ms: None,
        }
    } else if lower.contains("unknown station") || lower.contains("can not connect") {
        FetchError::InvalidRequest(message.to_string())
    } else {
        FetchError::Upstream {
            status: 200,
            message: message.to_string(),
        }
    }
}

// ── /feed ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct FeedData {
    /// Number, or `"-"` when the station has no current value.
    #[serde(default)]
    pub aqi: Value,
    #[serde(default)]
    pub idx: Option<i64>,
    #[serde(default)]
    pub city: Option<FeedCity>,
    #[serde(default)]
    pub iaqi: BTreeMap<String, IaqiValue>,
    #[serde(default)]
    pub time: Option<FeedTime>,
    #[serde(default)]
    pub forecast: Option<Forecast>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedCity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub geo: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IaqiValue {
    pub v: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTime {
    #[serde(default)]
    pub iso: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub daily: BTreeMap<String, Vec<DailyForecast>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyForecast {
    pub avg: f64,
    pub day: String,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Build a `Reading` from a feed payload. `requested` is kept as the
/// reading's coordinates so cache keys stay aligned with the caller's.
pub fn feed_to_reading(feed: &FeedData, requested: Coordinates) -> Result<Reading, FetchError> {
    let value = number(&feed.aqi)
        .ok_or_else(|| FetchError::Validation(format!("no current value (aqi={})", feed.aqi)))?;

    let source_name = feed
        .city
        .as_ref()
        .and_then(|c| c.name.clone())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| FetchError::Validation("feed missing station name".into()))?;

    let observed_at = feed
        .time
        .as_ref()
        .and_then(|t| t.iso.as_deref())
        .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| FetchError::Validation("feed missing observation time".into()))?;

    let factor_breakdown = feed
        .iaqi
        .iter()
        .filter(|(name, _)| POLLUTANTS.contains(&name.as_str()))
        .map(|(name, v)| (name.clone(), v.v))
        .collect();

    Ok(Reading {
        value,
        location_label: location_label(&source_name),
        coordinates: requested,
        source_name,
        observed_at,
        factor_breakdown,
        station_id: feed.idx.map(|idx| format!("@{}", idx)),
    })
}

/// Station names read "Street, City"; the last segment is the friendliest
/// label.
fn location_label(station_name: &str) -> String {
    station_name
        .rsplit(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(station_name)
        .to_string()
}

/// Fold the per-pollutant daily forecast arrays into one point per day.
/// A day's value is its highest pollutant average, matching how the
/// overall index is derived from sub-indices.
pub fn forecast_to_series(forecast: &Forecast, start: NaiveDate, end: NaiveDate) -> Vec<DailyPoint> {
    let mut days: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();

    for (pollutant, entries) in &forecast.daily {
        if !POLLUTANTS.contains(&pollutant.as_str()) {
            continue;
        }
        for entry in entries {
            let Ok(date) = NaiveDate::parse_from_str(&entry.day, "%Y-%m-%d") else {
                continue;
            };
            if date < start || date > end || !entry.avg.is_finite() {
                continue;
            }
            days.entry(date)
                .or_default()
                .insert(pollutant.clone(), entry.avg);
        }
    }

    days.into_iter()
        .map(|(date, factor_breakdown)| DailyPoint {
            date,
            value: factor_breakdown.values().copied().fold(0.0, f64::max),
            factor_breakdown,
        })
        .collect()
}

// ── /search ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub uid: i64,
    #[serde(default)]
    pub aqi: Value,
    pub station: SearchStation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchStation {
    pub name: String,
    #[serde(default)]
    pub geo: Vec<f64>,
}

impl From<SearchHit> for StationSummary {
    fn from(hit: SearchHit) -> Self {
        let coordinates = match hit.station.geo.as_slice() {
            [lat, lng] => Some(Coordinates::new(*lat, *lng)),
            _ => None,
        };
        StationSummary {
            station_key: format!("@{}", hit.uid),
            name: hit.station.name,
            coordinates,
            value: number(&hit.aqi),
        }
    }
}
