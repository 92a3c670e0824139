//! REST client for the World Air Quality Index API.
//!
//! Covers the three reads the sync engine needs: current feed by
//! coordinates, the daily series behind a station feed, and station
//! search. All requests are rate-limited and carry the API token.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::config::ProviderConfig;
use common::{Coordinates, DailyPoint, Error, FetchAdapter, FetchError, Reading, StationSummary};
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{self, Envelope, FeedData, SearchHit};
use crate::rate_limit::RateLimiter;

pub const ADAPTER_NAME: &str = "waqi";

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so DNS/TLS/socket failures are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(format_reqwest_error(&err))
    } else if err.is_decode() {
        FetchError::Validation(format_reqwest_error(&err))
    } else {
        FetchError::Network(format_reqwest_error(&err))
    }
}

/// Longest `Retry-After` honoured; larger hints are clamped.
const MAX_RETRY_AFTER_SECS: u64 = 60 * 60;

/// `Retry-After` in seconds, as milliseconds.
fn parse_retry_after(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.min(MAX_RETRY_AFTER_SECS).saturating_mul(1000))
}

/// Station keys are `@<idx>` from a feed or search, or a canonical
/// `lat,lng` key when no station id was known.
fn feed_path(station_key: &str) -> String {
    let key = station_key.trim();
    match key.split_once(',') {
        Some((lat, lng)) if !key.starts_with('@') => {
            format!("/feed/geo:{};{}/", lat.trim(), lng.trim())
        }
        _ => format!("/feed/{}/", key),
    }
}

/// Async WAQI client. Implements [`FetchAdapter`].
#[derive(Clone)]
pub struct WaqiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    limiter: RateLimiter,
}

impl std::fmt::Debug for WaqiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaqiClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl WaqiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        if config.api_token.trim().is_empty() {
            return Err(Error::Config(
                "provider.api_token is empty (set WAQI_TOKEN)".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("aqi-sync/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", format_reqwest_error(&e))))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.base_url),
            token: config.api_token.trim().to_string(),
            limiter: RateLimiter::per_second(config.requests_per_sec),
        })
    }

    /// URL helper.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.limiter.wait().await;
        debug!("WAQI GET {} {:?}", path, query);

        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .query(&[("token", self.token.as_str())])
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after_ms = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(match FetchError::from_status(status, &body) {
                FetchError::RateLimited { .. } => FetchError::RateLimited { retry_after_ms },
                other => other,
            });
        }

        let body = resp.text().await.map_err(map_reqwest_error)?;
        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| FetchError::Validation(format!("JSON parse error for {}: {}", path, e)))?;
        envelope.into_data()
    }
}

#[async_trait]
impl FetchAdapter for WaqiClient {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    async fn fetch_current(&self, location: Coordinates) -> Result<Reading, FetchError> {
        location.validate()?;
        let path = format!("/feed/geo:{};{}/", location.lat, location.lng);
        let feed: FeedData = self.get_json(&path, &[]).await?;
        models::feed_to_reading(&feed, location)
    }

    async fn fetch_historical(
        &self,
        station_key: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyPoint>, FetchError> {
        if start > end {
            return Err(FetchError::InvalidRequest(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if station_key.trim().is_empty() {
            return Err(FetchError::InvalidRequest("empty station key".into()));
        }

        let feed: FeedData = self.get_json(&feed_path(station_key), &[]).await?;
        let series = feed
            .forecast
            .as_ref()
            .map(|f| models::forecast_to_series(f, start, end))
            .unwrap_or_default();

        debug!(
            "WAQI {}: {} daily points between {} and {}",
            station_key,
            series.len(),
            start,
            end
        );
        Ok(series)
    }

    async fn search(&self, keyword: &str) -> Result<Vec<StationSummary>, FetchError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        let hits: Vec<SearchHit> = self.get_json("/search/", &[("keyword", keyword)]).await?;
        Ok(hits.into_iter().map(StationSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str) -> ProviderConfig {
        ProviderConfig {
            api_token: token.to_string(),
            base_url: "https://api.waqi.info/".into(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_requires_token() {
        assert!(matches!(WaqiClient::new(&config("  ")), Err(Error::Config(_))));
    }

    #[test]
    fn test_base_url_normalized() {
        let client = WaqiClient::new(&config("demo")).unwrap();
        assert_eq!(client.url("/search/"), "https://api.waqi.info/search/");
        assert_eq!(client.name(), "waqi");
    }

    #[test]
    fn test_feed_path_variants() {
        assert_eq!(feed_path("@3845"), "/feed/@3845/");
        assert_eq!(feed_path("38.5816,-121.4944"), "/feed/geo:38.5816;-121.4944/");
        assert_eq!(feed_path(" sacramento "), "/feed/sacramento/");
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Some(30_000));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }

    #[test]
    fn test_retry_after_clamped() {
        assert_eq!(parse_retry_after("18446744073709551615"), Some(3_600_000));
        assert_eq!(parse_retry_after("7200"), Some(3_600_000));
        assert_eq!(parse_retry_after("3600"), Some(3_600_000));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_rejected_before_request() {
        let client = WaqiClient::new(&config("demo")).unwrap();
        let err = client
            .fetch_current(Coordinates::new(0.0, 200.0))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let client = WaqiClient::new(&config("demo")).unwrap();
        let start = NaiveDate::from_ymd_opt(2026, 9, 20).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 9, 14).unwrap();
        let err = client.fetch_historical("@3845", start, end).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_blank_search_skips_request() {
        let client = WaqiClient::new(&config("demo")).unwrap();
        assert!(client.search("   ").await.unwrap().is_empty());
    }
}
