//! Weekly report assembly with a report-level cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use common::config::{CacheTtlConfig, InsightsConfig};
use common::{Clock, Coordinates, Error, FetchAdapter, FetchError, WeeklyReport};
use sync_cache::{CacheStats, TtlCache};
use tracing::{debug, info};

use crate::engine::{compute_insights, normalize_series};

/// Days in a report window, today included.
pub const REPORT_WINDOW_DAYS: u64 = 7;

pub struct ReportAssembler {
    adapter: Arc<dyn FetchAdapter>,
    cache: TtlCache<WeeklyReport>,
    config: InsightsConfig,
    report_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ReportAssembler {
    pub fn new(
        adapter: Arc<dyn FetchAdapter>,
        config: InsightsConfig,
        ttls: &CacheTtlConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        config.validate()?;
        ttls.validate()?;
        Ok(Self {
            adapter,
            cache: TtlCache::new(clock.clone()),
            config,
            report_ttl: ttls.report_ttl(),
            clock,
        })
    }

    pub fn insights_config(&self) -> &InsightsConfig {
        &self.config
    }

    fn cache_key(&self, location: &Coordinates) -> String {
        format!("{}:report:{}", self.adapter.name(), location.cache_key())
    }

    /// `[today - 6, today]` in the clock's local calendar.
    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        let end = self.clock.today();
        let start = end
            .checked_sub_days(Days::new(REPORT_WINDOW_DAYS - 1))
            .unwrap_or(end);
        (start, end)
    }

    /// Build (or return the cached) weekly report for `location`.
    ///
    /// `label` overrides the provider's location name, on cache hits too.
    /// Without one, a cached report keeps the label it was built with.
    ///
    /// `Ok(None)` means the provider has no history for the window; the
    /// caller decides whether to substitute anything.
    pub async fn generate_report(
        &self,
        location: Coordinates,
        label: Option<&str>,
    ) -> Result<Option<WeeklyReport>, FetchError> {
        // 1. Cached report.
        let key = self.cache_key(&location);
        if let Some(mut report) = self.cache.get(&key) {
            debug!("report cache hit: {}", key);
            // The cache is keyed by location only; the label is per call.
            if let Some(label) = label {
                report.location_label = label.to_string();
            }
            return Ok(Some(report));
        }

        // 2. Resolve the station behind this location.
        location.validate()?;
        let current = self.adapter.fetch_current(location).await?;
        let station_key = current
            .station_id
            .clone()
            .unwrap_or_else(|| location.cache_key());

        // 3. Trailing window ending today.
        let (start, end) = self.window();
        let raw = self.adapter.fetch_historical(&station_key, start, end).await?;
        let series: Vec<_> = normalize_series(&raw)
            .into_iter()
            .filter(|p| p.date >= start && p.date <= end)
            .collect();

        // 4. Nothing to report.
        if series.is_empty() {
            info!(
                "no history for {} ({}) between {} and {}",
                location.cache_key(),
                station_key,
                start,
                end
            );
            return Ok(None);
        }

        // 5. Assemble and cache.
        let insights = compute_insights(&series, &self.config);
        let report = WeeklyReport {
            location_label: label
                .map(str::to_string)
                .unwrap_or_else(|| current.location_label.clone()),
            coordinates: location,
            period_start: start,
            period_end: end,
            series,
            insights,
            generated_at: self.clock.now(),
            synthetic: false,
        };

        info!(
            "report for {}: avg={} trend={:?} ({}%) over {} days",
            report.location_label,
            report.insights.weekly_average,
            report.insights.trend,
            report.insights.trend_magnitude_pct,
            report.series.len()
        );

        self.cache.set(key, report.clone(), self.report_ttl);
        Ok(Some(report))
    }

    /// Drop the cached report for `location`.
    pub fn invalidate(&self, location: &Coordinates) -> bool {
        self.cache.remove(&self.cache_key(location)).is_some()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use common::{DailyPoint, ManualClock, Reading, StationSummary, Trend};

    struct HistoryAdapter {
        history: Vec<DailyPoint>,
        station_id: Option<String>,
        current_calls: AtomicUsize,
        historical_calls: AtomicUsize,
        requested: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
        fail_current: bool,
    }

    impl HistoryAdapter {
        fn new(history: Vec<DailyPoint>) -> Self {
            Self {
                history,
                station_id: Some("@5722".into()),
                current_calls: AtomicUsize::new(0),
                historical_calls: AtomicUsize::new(0),
                requested: Mutex::new(Vec::new()),
                fail_current: false,
            }
        }
    }

    #[async_trait]
    impl FetchAdapter for HistoryAdapter {
        fn name(&self) -> &str {
            "history"
        }

        async fn fetch_current(&self, location: Coordinates) -> Result<Reading, FetchError> {
            self.current_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_current {
                return Err(FetchError::Upstream {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            Ok(Reading {
                value: 61.0,
                location_label: "Portland".into(),
                coordinates: location,
                source_name: "Portland SE Lafayette".into(),
                observed_at: Utc::now(),
                factor_breakdown: BTreeMap::new(),
                station_id: self.station_id.clone(),
            })
        }

        async fn fetch_historical(
            &self,
            station_key: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<DailyPoint>, FetchError> {
            self.historical_calls.fetch_add(1, Ordering::SeqCst);
            self.requested
                .lock()
                .unwrap()
                .push((station_key.to_string(), start, end));
            Ok(self.history.clone())
        }

        async fn search(&self, _keyword: &str) -> Result<Vec<StationSummary>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn point(date: NaiveDate, value: f64) -> DailyPoint {
        DailyPoint {
            date,
            value,
            factor_breakdown: BTreeMap::from([("pm25".to_string(), value)]),
        }
    }

    fn clock() -> Arc<ManualClock> {
        // Midday UTC keeps the local date stable across test hosts' zones.
        Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 9, 20, 12, 0, 0).unwrap(),
        ))
    }

    fn assembler(adapter: Arc<HistoryAdapter>, clock: Arc<ManualClock>) -> ReportAssembler {
        ReportAssembler::new(
            adapter,
            InsightsConfig::default(),
            &CacheTtlConfig::default(),
            clock,
        )
        .unwrap()
    }

    fn portland() -> Coordinates {
        Coordinates::new(45.5152, -122.6784)
    }

    #[tokio::test]
    async fn test_report_built_and_cached() {
        let clock = clock();
        let today = clock.today();
        let history: Vec<DailyPoint> = [40.0, 42.0, 41.0, 70.0, 72.0, 75.0, 78.0]
            .iter()
            .enumerate()
            .map(|(i, v)| point(today - Days::new(6 - i as u64), *v))
            .collect();
        let adapter = Arc::new(HistoryAdapter::new(history));
        let reports = assembler(adapter.clone(), clock.clone());

        let report = reports
            .generate_report(portland(), Some("Home"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.location_label, "Home");
        assert_eq!(report.period_end, today);
        assert_eq!(report.period_start, today - Days::new(6));
        assert_eq!(report.series.len(), 7);
        assert_eq!(report.insights.trend, Trend::Worsening);
        assert!(!report.synthetic);

        let requested = adapter.requested.lock().unwrap().clone();
        assert_eq!(requested, vec![("@5722".to_string(), today - Days::new(6), today)]);

        let again = reports.generate_report(portland(), None).await.unwrap();
        assert_eq!(again, Some(report));
        assert_eq!(adapter.historical_calls.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.current_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_report_takes_callers_label() {
        let clock = clock();
        let adapter = Arc::new(HistoryAdapter::new(vec![point(clock.today(), 30.0)]));
        let reports = assembler(adapter.clone(), clock);

        let home = reports
            .generate_report(portland(), Some("Home"))
            .await
            .unwrap()
            .unwrap();
        let office = reports
            .generate_report(portland(), Some("Office"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(home.location_label, "Home");
        assert_eq!(office.location_label, "Office");
        assert_eq!(office.insights, home.insights);
        assert_eq!(adapter.historical_calls.load(Ordering::SeqCst), 1);

        let unlabeled = reports.generate_report(portland(), None).await.unwrap().unwrap();
        assert_eq!(unlabeled.location_label, "Home");
    }

    #[tokio::test]
    async fn test_report_expires_after_ttl() {
        let clock = clock();
        let today = clock.today();
        let adapter = Arc::new(HistoryAdapter::new(vec![point(today, 30.0)]));
        let reports = assembler(adapter.clone(), clock.clone());

        reports.generate_report(portland(), None).await.unwrap();
        clock.advance(Duration::from_secs(6 * 60 * 60));
        reports.generate_report(portland(), None).await.unwrap();
        assert_eq!(adapter.historical_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_history_is_absent_and_not_cached() {
        let clock = clock();
        let adapter = Arc::new(HistoryAdapter::new(Vec::new()));
        let reports = assembler(adapter.clone(), clock);

        assert_eq!(reports.generate_report(portland(), None).await.unwrap(), None);
        assert_eq!(reports.generate_report(portland(), None).await.unwrap(), None);
        assert_eq!(adapter.historical_calls.load(Ordering::SeqCst), 2);
        assert_eq!(reports.cache_stats().total, 0);
    }

    #[tokio::test]
    async fn test_series_clipped_to_window() {
        let clock = clock();
        let today = clock.today();
        let adapter = Arc::new(HistoryAdapter::new(vec![
            point(today - Days::new(19), 300.0),
            point(today - Days::new(6), 20.0),
            point(today, 25.0),
            point(today + Days::new(1), 500.0),
        ]));
        let reports = assembler(adapter, clock);

        let report = reports
            .generate_report(portland(), None)
            .await
            .unwrap()
            .unwrap();
        let dates: Vec<NaiveDate> = report.series.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![today - Days::new(6), today]);
        assert_eq!(report.location_label, "Portland");
    }

    #[tokio::test]
    async fn test_station_falls_back_to_coordinates() {
        let clock = clock();
        let mut inner = HistoryAdapter::new(Vec::new());
        inner.station_id = None;
        let adapter = Arc::new(inner);
        let reports = assembler(adapter.clone(), clock);

        reports.generate_report(portland(), None).await.unwrap();
        let requested = adapter.requested.lock().unwrap().clone();
        assert_eq!(requested[0].0, "45.5152,-122.6784");
    }

    #[tokio::test]
    async fn test_failure_surfaces() {
        let clock = clock();
        let mut inner = HistoryAdapter::new(vec![point(clock.today(), 25.0)]);
        inner.fail_current = true;
        let reports = assembler(Arc::new(inner), clock);

        let err = reports.generate_report(portland(), None).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, FetchError::Upstream { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_rejected() {
        let adapter = Arc::new(HistoryAdapter::new(Vec::new()));
        let reports = assembler(adapter.clone(), clock());

        let err = reports
            .generate_report(Coordinates::new(91.0, 0.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
        assert_eq!(adapter.current_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let clock = clock();
        let adapter = Arc::new(HistoryAdapter::new(vec![point(clock.today(), 25.0)]));
        let reports = assembler(adapter.clone(), clock);

        reports.generate_report(portland(), None).await.unwrap();
        assert!(reports.invalidate(&portland()));
        assert!(!reports.invalidate(&portland()));
        reports.generate_report(portland(), None).await.unwrap();
        assert_eq!(adapter.historical_calls.load(Ordering::SeqCst), 2);
    }
}
