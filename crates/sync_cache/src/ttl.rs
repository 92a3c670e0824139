//! Generic expiring cache keyed by a string fingerprint.
//!
//! Uses `DashMap` so pollers for different locations can read and write
//! concurrently without a global lock. Entries are replaced wholesale,
//! never mutated in place.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use dashmap::DashMap;
use tracing::debug;

/// A cached payload with its expiry. Valid iff `now < expires_at_ms`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub expires_at_ms: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_valid(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
}

/// Thread-safe TTL cache. Callers own key canonicalization.
pub struct TtlCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Return a copy of the payload if it has not expired. An expired
    /// entry is evicted on the way out; stale data is never returned.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.is_valid(now) => return Some(entry.payload.clone()),
            Some(_) => {}
        }

        self.entries.remove_if(key, |_, entry| !entry.is_valid(now));
        debug!("cache entry expired: {}", key);
        None
    }

    /// Insert or unconditionally overwrite `key`.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);
        self.entries.insert(
            key.into(),
            CacheEntry {
                payload: value,
                expires_at_ms,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|(_, entry)| entry.payload)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let total = self.entries.len();
        let valid = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_valid(now))
            .count();
        CacheStats {
            total,
            valid,
            expired: total.saturating_sub(valid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;

    fn cache() -> (Arc<ManualClock>, TtlCache<String>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = TtlCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_get_before_expiry() {
        let (clock, cache) = cache();
        cache.set("37.7749,-122.4194", "42".to_string(), Duration::from_secs(60));

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(cache.get("37.7749,-122.4194").as_deref(), Some("42"));
    }

    #[test]
    fn test_get_at_expiry_is_absent() {
        let (clock, cache) = cache();
        cache.set("k", "v".to_string(), Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        // Evicted by the read.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_stats_report_expired_entries() {
        let (clock, cache) = cache();
        cache.set("short", "a".to_string(), Duration::from_secs(10));
        cache.set("long", "b".to_string(), Duration::from_secs(600));

        clock.advance(Duration::from_secs(11));
        assert_eq!(
            cache.stats(),
            CacheStats {
                total: 2,
                valid: 1,
                expired: 1
            }
        );
    }

    #[test]
    fn test_set_overwrites() {
        let (clock, cache) = cache();
        cache.set("k", "old".to_string(), Duration::from_secs(5));
        cache.set("k", "new".to_string(), Duration::from_secs(60));

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get("k").as_deref(), Some("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_and_purge() {
        let (clock, cache) = cache();
        cache.set("a", "1".to_string(), Duration::from_secs(1));
        cache.set("b", "2".to_string(), Duration::from_secs(100));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_returned_value_is_a_copy() {
        let (_clock, cache) = cache();
        cache.set("k", "v".to_string(), Duration::from_secs(60));

        let mut copy = cache.get("k").unwrap();
        copy.push_str("-mutated");
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }
}
