//! The provider capability the engine is polymorphic over.
//!
//! Concrete providers live in their own crates; the engine only ever
//! holds an `Arc<dyn FetchAdapter>` and never branches on which one.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FetchError;
use crate::types::{Coordinates, DailyPoint, Reading, StationSummary};

#[async_trait]
pub trait FetchAdapter: Send + Sync {
    /// Stable identifier, used to namespace cache keys and registry slots.
    fn name(&self) -> &str;

    async fn fetch_current(&self, location: Coordinates) -> Result<Reading, FetchError>;

    /// Daily points for `station_key` within `[start, end]` inclusive.
    async fn fetch_historical(
        &self,
        station_key: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyPoint>, FetchError>;

    async fn search(&self, keyword: &str) -> Result<Vec<StationSummary>, FetchError>;
}
