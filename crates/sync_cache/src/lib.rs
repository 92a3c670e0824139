//! In-memory caching for provider data.
//!
//! `TtlCache` is the expiring key/value store; `CachingAdapter` fronts any
//! `FetchAdapter` with one cache per class of data so repeated lookups
//! within their TTL never reach the network.

pub mod adapter;
pub mod ttl;

pub use adapter::{CachingAdapter, CachingStats};
pub use ttl::{CacheEntry, CacheStats, TtlCache};
