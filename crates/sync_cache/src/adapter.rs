//! Read-through caching in front of any provider.
//!
//! Wraps an `Arc<dyn FetchAdapter>` and is itself a `FetchAdapter`, so the
//! poller and report assembler use it without knowing it is there.
//! Failures are never cached.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::CacheTtlConfig;
use common::{Clock, Coordinates, DailyPoint, FetchAdapter, FetchError, Reading, StationSummary};
use tracing::debug;

use crate::ttl::{CacheStats, TtlCache};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachingStats {
    pub current: CacheStats,
    pub historical: CacheStats,
    pub search: CacheStats,
}

pub struct CachingAdapter {
    inner: Arc<dyn FetchAdapter>,
    ttls: CacheTtlConfig,
    current: TtlCache<Reading>,
    historical: TtlCache<Vec<DailyPoint>>,
    search: TtlCache<Vec<StationSummary>>,
}

impl CachingAdapter {
    pub fn new(inner: Arc<dyn FetchAdapter>, ttls: CacheTtlConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            ttls,
            current: TtlCache::new(clock.clone()),
            historical: TtlCache::new(clock.clone()),
            search: TtlCache::new(clock),
        }
    }

    fn current_key(&self, location: &Coordinates) -> String {
        format!("{}:{}", self.inner.name(), location.cache_key())
    }

    fn historical_key(&self, station_key: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!("{}:{}:{}:{}", self.inner.name(), station_key, start, end)
    }

    fn search_key(&self, keyword: &str) -> String {
        format!("{}:{}", self.inner.name(), keyword.trim().to_lowercase())
    }

    pub fn stats(&self) -> CachingStats {
        CachingStats {
            current: self.current.stats(),
            historical: self.historical.stats(),
            search: self.search.stats(),
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.current.purge_expired() + self.historical.purge_expired() + self.search.purge_expired()
    }

    pub fn clear(&self) {
        self.current.clear();
        self.historical.clear();
        self.search.clear();
    }
}

#[async_trait]
impl FetchAdapter for CachingAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_current(&self, location: Coordinates) -> Result<Reading, FetchError> {
        let key = self.current_key(&location);
        if let Some(hit) = self.current.get(&key) {
            debug!("current cache hit: {}", key);
            return Ok(hit);
        }

        let reading = self.inner.fetch_current(location).await?;
        if self.ttls.current_ttl_ms > 0 {
            self.current
                .set(key, reading.clone(), self.ttls.current_ttl());
        }
        Ok(reading)
    }

    async fn fetch_historical(
        &self,
        station_key: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyPoint>, FetchError> {
        let key = self.historical_key(station_key, start, end);
        if let Some(hit) = self.historical.get(&key) {
            debug!("historical cache hit: {}", key);
            return Ok(hit);
        }

        let series = self.inner.fetch_historical(station_key, start, end).await?;
        self.historical
            .set(key, series.clone(), self.ttls.historical_ttl());
        Ok(series)
    }

    async fn search(&self, keyword: &str) -> Result<Vec<StationSummary>, FetchError> {
        let key = self.search_key(keyword);
        if let Some(hit) = self.search.get(&key) {
            debug!("search cache hit: {}", key);
            return Ok(hit);
        }

        let results = self.inner.search(keyword).await?;
        self.search.set(key, results.clone(), self.ttls.search_ttl());
        Ok(results)
    }
}
