//! Placeholder reports for when real history is unavailable.
//!
//! The assembler never invents data. Callers opt in here with
//! [`FallbackPolicy::Placeholder`]; the result is flagged `synthetic`
//! and never cached.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use common::config::FallbackPolicy;
use common::{Coordinates, DailyPoint, FetchError, WeeklyReport};
use tracing::warn;

use crate::engine::compute_insights;
use crate::report::{ReportAssembler, REPORT_WINDOW_DAYS};

const PLACEHOLDER_BASE: f64 = 45.0;
const PLACEHOLDER_OFFSETS: [f64; 7] = [0.0, 6.0, -4.0, 10.0, -2.0, 8.0, 3.0];

/// A deterministic, moderate-range series of `days` points ending at `end`.
pub fn placeholder_series(end: NaiveDate, days: u64) -> Vec<DailyPoint> {
    (0..days)
        .filter_map(|i| {
            let date = end.checked_sub_days(Days::new(days - 1 - i))?;
            let value = PLACEHOLDER_BASE + PLACEHOLDER_OFFSETS[i as usize % PLACEHOLDER_OFFSETS.len()];
            let factor_breakdown = BTreeMap::from([
                ("pm25".to_string(), value),
                ("pm10".to_string(), (value * 0.55).round()),
                ("o3".to_string(), (value * 0.35).round()),
            ]);
            Some(DailyPoint {
                date,
                value,
                factor_breakdown,
            })
        })
        .collect()
}

/// `generate_report` with an explicit fallback policy.
///
/// Under `Placeholder`, an empty history or a retryable failure yields a
/// synthetic report. Client errors are surfaced under either policy,
/// since no placeholder fixes bad coordinates or credentials.
pub async fn generate_with_fallback(
    assembler: &ReportAssembler,
    location: Coordinates,
    label: Option<&str>,
    policy: FallbackPolicy,
) -> Result<Option<WeeklyReport>, FetchError> {
    let result = assembler.generate_report(location, label).await;
    if policy == FallbackPolicy::Surface {
        return result;
    }

    match result {
        Ok(Some(report)) => Ok(Some(report)),
        Ok(None) => {
            warn!(
                "no history for {}; using placeholder series",
                location.cache_key()
            );
            Ok(Some(placeholder_report(assembler, location, label)))
        }
        Err(err) if err.is_retryable() => {
            warn!(
                "report for {} failed ({}); using placeholder series",
                location.cache_key(),
                err
            );
            Ok(Some(placeholder_report(assembler, location, label)))
        }
        Err(err) => Err(err),
    }
}

fn placeholder_report(
    assembler: &ReportAssembler,
    location: Coordinates,
    label: Option<&str>,
) -> WeeklyReport {
    let (start, end) = assembler.window();
    let series = placeholder_series(end, REPORT_WINDOW_DAYS);
    let insights = compute_insights(&series, assembler.insights_config());
    WeeklyReport {
        location_label: label
            .map(str::to_string)
            .unwrap_or_else(|| location.cache_key()),
        coordinates: location,
        period_start: start,
        period_end: end,
        series,
        insights,
        generated_at: assembler.clock().now(),
        synthetic: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use common::config::{CacheTtlConfig, InsightsConfig};
    use common::{FetchAdapter, ManualClock, Reading, StationSummary};

    struct BrokenAdapter {
        error: FetchError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchAdapter for BrokenAdapter {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_current(&self, _location: Coordinates) -> Result<Reading, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }

        async fn fetch_historical(
            &self,
            _station_key: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyPoint>, FetchError> {
            Err(self.error.clone())
        }

        async fn search(&self, _keyword: &str) -> Result<Vec<StationSummary>, FetchError> {
            Err(self.error.clone())
        }
    }

    fn assembler(error: FetchError) -> (Arc<BrokenAdapter>, ReportAssembler) {
        let adapter = Arc::new(BrokenAdapter {
            error,
            calls: AtomicUsize::new(0),
        });
        let assembler = ReportAssembler::new(
            adapter.clone(),
            InsightsConfig::default(),
            &CacheTtlConfig::default(),
            Arc::new(ManualClock::at(Utc::now())),
        )
        .unwrap();
        (adapter, assembler)
    }

    fn denver() -> Coordinates {
        Coordinates::new(39.7392, -104.9903)
    }

    #[test]
    fn test_placeholder_series_shape() {
        let end = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let series = placeholder_series(end, 7);

        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2026, 2, 4).unwrap());
        assert_eq!(series[6].date, end);
        assert!(series.iter().all(|p| p.value > 0.0 && p.value <= 100.0));
        assert_eq!(series, placeholder_series(end, 7));
    }

    #[tokio::test]
    async fn test_surface_policy_returns_failure() {
        let (_, assembler) = assembler(FetchError::Timeout("30s".into()));
        let result =
            generate_with_fallback(&assembler, denver(), None, FallbackPolicy::Surface).await;
        assert_eq!(result, Err(FetchError::Timeout("30s".into())));
    }

    #[tokio::test]
    async fn test_placeholder_policy_substitutes_synthetic_report() {
        let (adapter, assembler) = assembler(FetchError::Network("reset".into()));
        let report = generate_with_fallback(
            &assembler,
            denver(),
            Some("Denver"),
            FallbackPolicy::Placeholder,
        )
        .await
        .unwrap()
        .unwrap();

        assert!(report.synthetic);
        assert_eq!(report.location_label, "Denver");
        assert_eq!(report.series.len(), 7);
        assert_eq!(report.period_end, report.series[6].date);
        assert_eq!(report.insights.dominant_factor.as_deref(), Some("pm25"));

        // Synthetic reports are not cached; the next call goes upstream.
        generate_with_fallback(&assembler, denver(), None, FallbackPolicy::Placeholder)
            .await
            .unwrap();
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(assembler.cache_stats().total, 0);
    }

    #[tokio::test]
    async fn test_client_errors_surface_under_placeholder() {
        let (_, assembler) = assembler(FetchError::Unauthorized("Invalid key".into()));
        let result =
            generate_with_fallback(&assembler, denver(), None, FallbackPolicy::Placeholder).await;
        assert!(matches!(result, Err(FetchError::Unauthorized(_))));
    }
}
