//! Engine configuration types.
//!
//! Every field has a serde default so a partial `config.toml` is valid.
//! Each section validates itself; the poller and report assembler call
//! `validate` at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upstream provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Locations to keep fresh.
    #[serde(default = "default_locations")]
    pub locations: Vec<LocationConfig>,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub cache: CacheTtlConfig,

    #[serde(default)]
    pub insights: InsightsConfig,

    /// What to do when a weekly report cannot be built from real data.
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API token (usually supplied via `WAQI_TOKEN`).
    #[serde(default)]
    pub api_token: String,

    /// Client-side request cap.
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// A named location to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// Poller timing (all values in milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Recurring timer period.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Floor between two fetch starts; closer ticks are skipped.
    #[serde(default = "default_min_fetch_interval")]
    pub min_fetch_interval_ms: u64,

    /// Backoff retries per failure episode.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff unit.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Readings above this are rejected as implausible.
    #[serde(default = "default_max_plausible_value")]
    pub max_plausible_value: f64,
}

/// Cache TTLs per class of data (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_current_ttl")]
    pub current_ttl_ms: u64,

    #[serde(default = "default_historical_ttl")]
    pub historical_ttl_ms: u64,

    #[serde(default = "default_search_ttl")]
    pub search_ttl_ms: u64,

    #[serde(default = "default_report_ttl")]
    pub report_ttl_ms: u64,
}

/// One severity band. `max` is inclusive; `None` means unbounded and is
/// only allowed on the last band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityBand {
    pub name: String,
    #[serde(default)]
    pub max: Option<f64>,
}

/// How the series is halved for trend detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendSplit {
    /// First `ceil(n/2)` vs last `ceil(n/2)`; odd series share the middle point.
    #[default]
    Overlapping,
    /// First `floor(n/2)` vs last `floor(n/2)`; odd series drop the middle point.
    Disjoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsConfig {
    #[serde(default = "default_bands")]
    pub bands: Vec<SeverityBand>,

    #[serde(default)]
    pub trend_split: TrendSplit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Report the failure (or absence) to the caller.
    #[default]
    Surface,
    /// Substitute a synthetic, clearly flagged report.
    Placeholder,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.waqi.info".into()
}
fn default_requests_per_sec() -> u32 {
    5
}
fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    5 * 60 * 1000
}
fn default_min_fetch_interval() -> u64 {
    60 * 1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_max_plausible_value() -> f64 {
    1000.0
}

fn default_current_ttl() -> u64 {
    60 * 1000
}
fn default_historical_ttl() -> u64 {
    60 * 60 * 1000
}
fn default_search_ttl() -> u64 {
    24 * 60 * 60 * 1000
}
fn default_report_ttl() -> u64 {
    6 * 60 * 60 * 1000
}

fn default_bands() -> Vec<SeverityBand> {
    [
        ("good", Some(50.0)),
        ("moderate", Some(100.0)),
        ("unhealthy_for_sensitive", Some(150.0)),
        ("unhealthy", Some(200.0)),
        ("very_unhealthy", Some(300.0)),
        ("hazardous", None),
    ]
    .into_iter()
    .map(|(name, max)| SeverityBand {
        name: name.into(),
        max,
    })
    .collect()
}

fn default_locations() -> Vec<LocationConfig> {
    vec![
        LocationConfig {
            name: "San Francisco".into(),
            lat: 37.7749,
            lng: -122.4194,
        },
        LocationConfig {
            name: "Los Angeles".into(),
            lat: 34.0522,
            lng: -118.2437,
        },
    ]
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: String::new(),
            requests_per_sec: default_requests_per_sec(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            min_fetch_interval_ms: default_min_fetch_interval(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            max_plausible_value: default_max_plausible_value(),
        }
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            current_ttl_ms: default_current_ttl(),
            historical_ttl_ms: default_historical_ttl(),
            search_ttl_ms: default_search_ttl(),
            report_ttl_ms: default_report_ttl(),
        }
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            bands: default_bands(),
            trend_split: TrendSplit::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            locations: default_locations(),
            poller: PollerConfig::default(),
            cache: CacheTtlConfig::default(),
            insights: InsightsConfig::default(),
            fallback: FallbackPolicy::default(),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────

fn into_result(section: &str, issues: Vec<String>) -> Result<(), Error> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid {} config:\n - {}",
            section,
            issues.join("\n - ")
        )))
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.min_fetch_interval_ms)
    }

    /// Backoff delay for the `retry_count`-th consecutive retry (1-based):
    /// `retry_delay * 2^(retry_count - 1)`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(1u64 << exponent))
    }

    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.poll_interval_ms == 0 {
            issues.push("poller.poll_interval_ms must be > 0".into());
        }
        if self.retry_delay_ms == 0 && self.max_retries > 0 {
            issues.push("poller.retry_delay_ms must be > 0 when retries are enabled".into());
        }
        if self.max_retries > 10 {
            issues.push("poller.max_retries must be <= 10".into());
        }
        if !self.max_plausible_value.is_finite() || self.max_plausible_value <= 0.0 {
            issues.push("poller.max_plausible_value must be a finite number > 0".into());
        }
        issues
    }

    pub fn validate(&self) -> Result<(), Error> {
        into_result("poller", self.issues())
    }
}

impl CacheTtlConfig {
    pub fn current_ttl(&self) -> Duration {
        Duration::from_millis(self.current_ttl_ms)
    }

    pub fn historical_ttl(&self) -> Duration {
        Duration::from_millis(self.historical_ttl_ms)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_millis(self.search_ttl_ms)
    }

    pub fn report_ttl(&self) -> Duration {
        Duration::from_millis(self.report_ttl_ms)
    }

    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.historical_ttl_ms == 0 {
            issues.push("cache.historical_ttl_ms must be > 0".into());
        }
        if self.search_ttl_ms == 0 {
            issues.push("cache.search_ttl_ms must be > 0".into());
        }
        if self.report_ttl_ms == 0 {
            issues.push("cache.report_ttl_ms must be > 0".into());
        }
        issues
    }

    pub fn validate(&self) -> Result<(), Error> {
        into_result("cache", self.issues())
    }
}

impl InsightsConfig {
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.bands.is_empty() {
            issues.push("insights.bands must contain at least one band".into());
        }
        let mut previous: Option<f64> = None;
        for (i, band) in self.bands.iter().enumerate() {
            if band.name.trim().is_empty() {
                issues.push(format!("insights.bands[{}] has an empty name", i));
            }
            match band.max {
                Some(max) => {
                    if !max.is_finite() {
                        issues.push(format!("insights.bands[{}].max must be finite", i));
                    }
                    if let Some(prev) = previous {
                        if max <= prev {
                            issues.push(format!(
                                "insights.bands[{}].max must be greater than {}",
                                i, prev
                            ));
                        }
                    }
                    previous = Some(max);
                }
                None if i + 1 != self.bands.len() => {
                    issues.push(format!(
                        "insights.bands[{}] is unbounded but is not the last band",
                        i
                    ));
                }
                None => {}
            }
        }
        issues
    }

    pub fn validate(&self) -> Result<(), Error> {
        into_result("insights", self.issues())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = SyncConfig::default();
        assert!(cfg.poller.validate().is_ok());
        assert!(cfg.cache.validate().is_ok());
        assert!(cfg.insights.validate().is_ok());
        assert_eq!(cfg.fallback, FallbackPolicy::Surface);
        assert_eq!(cfg.insights.bands.len(), 6);
    }

    #[test]
    fn test_backoff_doubles() {
        let cfg = PollerConfig {
            retry_delay_ms: 1000,
            ..PollerConfig::default()
        };
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(cfg.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(cfg.backoff_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_poller_validation_collects_issues() {
        let cfg = PollerConfig {
            poll_interval_ms: 0,
            max_plausible_value: -1.0,
            ..PollerConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
        assert!(err.contains("max_plausible_value"));
    }

    #[test]
    fn test_bands_must_increase() {
        let cfg = InsightsConfig {
            bands: vec![
                SeverityBand {
                    name: "low".into(),
                    max: Some(100.0),
                },
                SeverityBand {
                    name: "mid".into(),
                    max: Some(50.0),
                },
            ],
            trend_split: TrendSplit::Overlapping,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unbounded_band_only_last() {
        let cfg = InsightsConfig {
            bands: vec![
                SeverityBand {
                    name: "all".into(),
                    max: None,
                },
                SeverityBand {
                    name: "never".into(),
                    max: Some(10.0),
                },
            ],
            trend_split: TrendSplit::Overlapping,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: SyncConfig = serde_json::from_str(
            r#"{"poller": {"poll_interval_ms": 1000}, "fallback": "placeholder"}"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.poller.poll_interval_ms, 1000);
        assert_eq!(cfg.poller.max_retries, 3);
        assert_eq!(cfg.fallback, FallbackPolicy::Placeholder);
        assert_eq!(cfg.locations.len(), 2);
    }
}
