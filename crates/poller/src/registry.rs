//! One poller per (location, adapter).
//!
//! Callers ask the registry instead of constructing pollers directly, so
//! two screens watching the same place share one timer and one request
//! budget. Registry pollers are pinned to the location they are keyed
//! under; moving one goes through [`PollerRegistry::relocate`] so the key
//! always matches what is being polled.

use std::sync::Arc;

use common::config::PollerConfig;
use common::{Clock, Coordinates, Error, FetchAdapter};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::clock::TokioClock;
use crate::poller::Poller;

pub struct PollerRegistry {
    pollers: DashMap<String, Poller>,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
}

impl PollerRegistry {
    pub fn new(config: PollerConfig) -> Result<Self, Error> {
        Self::with_clock(config, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(config: PollerConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            pollers: DashMap::new(),
            config,
            clock,
        })
    }

    fn key(location: &Coordinates, adapter_name: &str) -> String {
        format!("{}@{}", adapter_name, location.cache_key())
    }

    /// The poller for this pair, created on first request. The returned
    /// poller is not started.
    pub fn poller_for(&self, location: Coordinates, adapter: Arc<dyn FetchAdapter>) -> Poller {
        let key = Self::key(&location, adapter.name());
        self.pollers
            .entry(key)
            .or_insert_with(|| {
                Poller::build(adapter, self.config.clone(), self.clock.clone(), Some(location))
            })
            .clone()
    }

    /// Move the poller registered at `from` to `to`, re-keying it.
    ///
    /// When another poller already owns `to`, the one at `from` is stopped
    /// and dropped, and the owner of `to` is returned instead; its
    /// subscribers are not carried over. An active poller is restarted at
    /// the new location. Returns `None` when nothing is registered at
    /// `from`.
    pub async fn relocate(
        &self,
        from: &Coordinates,
        to: Coordinates,
        adapter_name: &str,
    ) -> Option<Poller> {
        let from_key = Self::key(from, adapter_name);
        let to_key = Self::key(&to, adapter_name);
        if from_key == to_key {
            return self.get(from, adapter_name);
        }

        let (_, moving) = self.pollers.remove(&from_key)?;
        moving.repin(to).await;

        // 1. Target already owned: keep that one.
        let existing = match self.pollers.entry(to_key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(moving.clone());
                None
            }
        };
        if let Some(owner) = existing {
            moving.stop().await;
            info!("relocate {} → {}: already polled, dropped source", from_key, to_key);
            return Some(owner);
        }

        // 2. Re-keyed; follow with the poll itself.
        info!("relocated poller {} → {}", from_key, to_key);
        if moving.is_active().await {
            moving.update_location(to).await;
        }
        Some(moving)
    }

    pub fn get(&self, location: &Coordinates, adapter_name: &str) -> Option<Poller> {
        self.pollers
            .get(&Self::key(location, adapter_name))
            .map(|entry| entry.value().clone())
    }

    /// Stop and forget one poller. Returns false when none was registered.
    pub async fn dispose(&self, location: &Coordinates, adapter_name: &str) -> bool {
        let removed = self.pollers.remove(&Self::key(location, adapter_name));
        match removed {
            Some((key, poller)) => {
                poller.stop().await;
                info!("disposed poller {}", key);
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let keys: Vec<String> = self.pollers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, poller)) = self.pollers.remove(&key) {
                poller.stop().await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pollers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.is_empty()
    }
}
