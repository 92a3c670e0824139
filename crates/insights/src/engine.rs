//! Insights over a daily series.
//!
//! Pure functions: the same series and bands always produce the same
//! `Insights`, rebuilt from scratch each time.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use common::config::{InsightsConfig, SeverityBand, TrendSplit};
use common::{BucketCount, DailyPoint, DayValue, Insights, Trend};
use tracing::debug;

/// Tie-break order for dominant factors. Unlisted factors rank after
/// these, alphabetically.
pub const FACTOR_PRIORITY: [&str; 6] = ["pm25", "pm10", "o3", "no2", "so2", "co"];

/// Second-half change (percent) beyond which a trend is not `Stable`.
pub const TREND_THRESHOLD_PCT: f64 = 10.0;

/// Sort ascending by date, keep the last point seen for each date, and
/// drop points whose value is not a finite number.
pub fn normalize_series(series: &[DailyPoint]) -> Vec<DailyPoint> {
    let mut by_date: BTreeMap<NaiveDate, DailyPoint> = BTreeMap::new();
    for point in series {
        if !point.value.is_finite() {
            debug!("dropping non-finite value for {}", point.date);
            continue;
        }
        by_date.insert(point.date, point.clone());
    }
    by_date.into_values().collect()
}

pub fn compute_insights(series: &[DailyPoint], config: &InsightsConfig) -> Insights {
    let series = normalize_series(series);
    let bucket_counts = bucket_counts(&series, &config.bands);

    if series.is_empty() {
        return Insights {
            bucket_counts,
            ..Insights::default()
        };
    }

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let (trend, trend_magnitude_pct) = trend(&values, config.trend_split);

    Insights {
        weekly_average: mean(&values).round(),
        trend,
        trend_magnitude_pct,
        best_day: extreme_day(&series, |candidate, current| candidate < current),
        worst_day: extreme_day(&series, |candidate, current| candidate > current),
        dominant_factor: dominant_factor(&series),
        bucket_counts,
        breakdown: breakdown(&series),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

// ── Trend ────────────────────────────────────────────────────────────

/// Percentage change of the later half's mean over the earlier half's.
pub fn trend(values: &[f64], split: TrendSplit) -> (Trend, f64) {
    let n = values.len();
    if n < 2 {
        return (Trend::Stable, 0.0);
    }

    let half = match split {
        TrendSplit::Overlapping => (n + 1) / 2,
        TrendSplit::Disjoint => n / 2,
    };
    let first = mean(&values[..half]);
    let second = mean(&values[n - half..]);

    let change = if first == 0.0 {
        0.0
    } else {
        (second - first) / first * 100.0
    };

    let trend = if change > TREND_THRESHOLD_PCT {
        Trend::Worsening
    } else if change < -TREND_THRESHOLD_PCT {
        Trend::Improving
    } else {
        Trend::Stable
    };
    (trend, change.abs().round())
}

// ── Best / worst ─────────────────────────────────────────────────────

/// Series is date-ascending, so only a strict improvement replaces the
/// current pick and ties keep the earliest date.
fn extreme_day(series: &[DailyPoint], better: impl Fn(f64, f64) -> bool) -> Option<DayValue> {
    let mut pick: Option<&DailyPoint> = None;
    for point in series {
        let replace = match pick {
            None => true,
            Some(current) => better(point.value, current.value),
        };
        if replace {
            pick = Some(point);
        }
    }
    pick.map(|p| DayValue {
        date: p.date,
        value: p.value,
    })
}

// ── Dominant factor ──────────────────────────────────────────────────

fn priority_rank(factor: &str) -> (usize, &str) {
    let known = FACTOR_PRIORITY
        .iter()
        .position(|f| *f == factor)
        .unwrap_or(FACTOR_PRIORITY.len());
    (known, factor)
}

/// The factor with the largest positive value that day, if any.
fn daily_dominant(breakdown: &BTreeMap<String, f64>) -> Option<&str> {
    breakdown
        .iter()
        .filter(|(_, v)| v.is_finite() && **v > 0.0)
        .max_by(|(fa, va), (fb, vb)| {
            va.total_cmp(vb)
                .then_with(|| priority_rank(fb).cmp(&priority_rank(fa)))
        })
        .map(|(factor, _)| factor.as_str())
}

fn dominant_factor(series: &[DailyPoint]) -> Option<String> {
    let mut wins: HashMap<&str, usize> = HashMap::new();
    for point in series {
        if let Some(factor) = daily_dominant(&point.factor_breakdown) {
            *wins.entry(factor).or_insert(0) += 1;
        }
    }

    wins.into_iter()
        .max_by(|(fa, ca), (fb, cb)| {
            ca.cmp(cb)
                .then_with(|| priority_rank(fb).cmp(&priority_rank(fa)))
        })
        .map(|(factor, _)| factor.to_string())
}

// ── Buckets and breakdown ────────────────────────────────────────────

fn band_index(value: f64, bands: &[SeverityBand]) -> Option<usize> {
    bands
        .iter()
        .position(|band| band.max.map_or(true, |max| value <= max))
}

/// First band whose upper bound is at or above `value`.
pub fn band_for(value: f64, bands: &[SeverityBand]) -> Option<&SeverityBand> {
    band_index(value, bands).map(|i| &bands[i])
}

fn bucket_counts(series: &[DailyPoint], bands: &[SeverityBand]) -> Vec<BucketCount> {
    let mut counts: Vec<BucketCount> = bands
        .iter()
        .map(|band| BucketCount {
            category: band.name.clone(),
            count: 0,
        })
        .collect();

    for point in series {
        match band_index(point.value, bands) {
            Some(i) => counts[i].count += 1,
            None => debug!("{} value {} above every band", point.date, point.value),
        }
    }
    counts
}

fn breakdown(series: &[DailyPoint]) -> BTreeMap<String, Vec<f64>> {
    let mut out: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for point in series {
        for (factor, value) in &point.factor_breakdown {
            if value.is_finite() && *value > 0.0 {
                out.entry(factor.clone()).or_default().push(*value);
            }
        }
    }
    out
}
