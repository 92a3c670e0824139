//! Subscriber registry and callback surface.
//!
//! Callbacks run synchronously on the poller's task, in subscription
//! order. Keep them short; anything slow belongs behind a
//! [`ChannelSubscriber`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{ConnectionState, FetchError, Reading};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives poller notifications. Every method defaults to a no-op so
/// implementors only override what they care about.
pub trait Subscriber: Send + Sync {
    fn on_update(&self, _reading: &Reading) {}

    fn on_error(&self, _error: &FetchError) {}

    fn on_connection_change(&self, _state: ConnectionState) {}
}

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct SubscriberSet {
    next_id: AtomicU64,
    entries: DashMap<u64, Arc<dyn Subscriber>>,
}

impl SubscriberSet {
    pub(crate) fn add(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(id, subscriber);
        SubscriptionId(id)
    }

    /// Idempotent: removing an unknown id returns false.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.entries.remove(&id.0).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot in subscription order. Shard guards are released before
    /// any callback runs, so callbacks may subscribe or unsubscribe.
    fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        let mut all: Vec<(u64, Arc<dyn Subscriber>)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, s)| s).collect()
    }

    pub(crate) fn update(&self, reading: &Reading) {
        for subscriber in self.snapshot() {
            subscriber.on_update(reading);
        }
    }

    pub(crate) fn error(&self, error: &FetchError) {
        for subscriber in self.snapshot() {
            subscriber.on_error(error);
        }
    }

    pub(crate) fn connection(&self, state: Option<ConnectionState>) {
        let Some(state) = state else { return };
        for subscriber in self.snapshot() {
            subscriber.on_connection_change(state);
        }
    }
}

// ── Channel adapter ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PollerEvent {
    Updated(Reading),
    Failed(FetchError),
    Connection(ConnectionState),
}

/// Forwards every notification into an unbounded channel.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<PollerEvent>,
}

impl ChannelSubscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PollerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, event: PollerEvent) {
        if self.tx.send(event).is_err() {
            debug!("poller event dropped: receiver closed");
        }
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_update(&self, reading: &Reading) {
        self.send(PollerEvent::Updated(reading.clone()));
    }

    fn on_error(&self, error: &FetchError) {
        self.send(PollerEvent::Failed(error.clone()));
    }

    fn on_connection_change(&self, state: ConnectionState) {
        self.send(PollerEvent::Connection(state));
    }
}
