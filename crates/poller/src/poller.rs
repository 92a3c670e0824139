//! Async driver around [`PollerState`].
//!
//! One `Poller` watches one location through one adapter. It owns the
//! recurring poll timer, at most one pending backoff retry, and the
//! in-flight guard. Spawned timer tasks hold only a `Weak` reference, so
//! dropping every `Poller` handle lets them wind down on their own.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::config::PollerConfig;
use common::{Clock, ConnectionState, Coordinates, Error, FetchAdapter, Reading};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::TokioClock;
use crate::state::{CycleOutcome, FailureDecision, PollerState, SkipReason, Trigger};
use crate::subscriber::{Subscriber, SubscriberSet, SubscriptionId};

type BoxedCycle = Pin<Box<dyn Future<Output = CycleOutcome> + Send>>;

/// Cheap to clone; every clone drives the same poller.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn FetchAdapter>,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
    subscribers: SubscriberSet,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    state: PollerState,
    location: Option<Coordinates>,
    /// Bumped by `start` and `stop`; responses from an older generation
    /// are discarded.
    generation: u64,
    /// Set for registry-owned pollers: the only location this poller may
    /// watch until the registry moves it.
    pinned: Option<Coordinates>,
    in_flight: bool,
    timer: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

impl Shared {
    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry.take() {
            handle.abort();
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
        self.cancel_retry();
    }
}

impl Poller {
    /// Poller on tokio's clock.
    pub fn new(
        adapter: Arc<dyn FetchAdapter>,
        config: PollerConfig,
    ) -> Result<Self, Error> {
        Self::with_clock(adapter, config, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(
        adapter: Arc<dyn FetchAdapter>,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(adapter, config, clock, None))
    }

    /// Caller has already validated `config`.
    pub(crate) fn build(
        adapter: Arc<dyn FetchAdapter>,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
        pinned: Option<Coordinates>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                config,
                clock,
                subscribers: SubscriberSet::default(),
                shared: Mutex::new(Shared {
                    pinned,
                    ..Shared::default()
                }),
            }),
        }
    }

    pub(crate) async fn repin(&self, location: Coordinates) {
        self.inner.shared.lock().await.pinned = Some(location);
    }

    pub fn adapter_name(&self) -> &str {
        self.inner.adapter.name()
    }

    /// True when both handles drive the same poller.
    pub fn same_as(&self, other: &Poller) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.inner.subscribers.add(subscriber)
    }

    /// Idempotent; safe after `stop`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Begin polling `location`: one fetch right away (still subject to
    /// `min_fetch_interval` when restarting the same place), then one every
    /// `poll_interval`. Starting the location that is already active is a
    /// no-op; starting a different one replaces it. An explicit start also
    /// clears a halt left by a non-retryable failure.
    pub async fn start(&self, location: Coordinates) -> CycleOutcome {
        {
            let mut shared = self.inner.shared.lock().await;
            if let Some(pinned) = shared.pinned {
                if !pinned.same_location(&location) {
                    debug!(
                        "[{}] refusing {}: registered for {}",
                        self.adapter_name(),
                        location.cache_key(),
                        pinned.cache_key()
                    );
                    return CycleOutcome::Skipped(SkipReason::Pinned);
                }
            }

            let moved = match shared.location {
                Some(current) => !current.same_location(&location),
                None => true,
            };

            if shared.state.is_active && !moved {
                debug!(
                    "[{}] already polling {}",
                    self.adapter_name(),
                    location.cache_key()
                );
                return CycleOutcome::Skipped(SkipReason::AlreadyActive);
            }

            shared.cancel_timers();
            shared.generation += 1;
            shared.in_flight = false;
            if moved {
                shared.state.reset_for_new_location();
            }
            shared.state.halted = false;
            shared.state.is_active = true;
            shared.location = Some(location);

            info!(
                "[{}] polling {} every {}s",
                self.adapter_name(),
                location.cache_key(),
                self.inner.config.poll_interval().as_secs()
            );

            let change = shared.state.set_connection(ConnectionState::Connecting);
            self.inner.subscribers.connection(change);
            shared.timer = Some(spawn_timer(&self.inner));
        }

        run_cycle(&self.inner, Trigger::Initial).await
    }

    /// Cancel the timer and any pending retry. A response already in the
    /// air is discarded when it lands. No-op when not active.
    pub async fn stop(&self) {
        let mut shared = self.inner.shared.lock().await;
        if !shared.state.is_active {
            return;
        }

        shared.cancel_timers();
        shared.generation += 1;
        shared.in_flight = false;
        shared.state.is_active = false;

        let change = shared.state.set_connection(ConnectionState::Disconnected);
        self.inner.subscribers.connection(change);

        if let Some(location) = shared.location {
            info!("[{}] stopped polling {}", self.adapter_name(), location.cache_key());
        }
    }

    /// Fetch now, subject to the in-flight guard and `min_fetch_interval`.
    /// Calling this before `start` is a contract error.
    pub async fn refresh(&self) -> Result<CycleOutcome, Error> {
        {
            let shared = self.inner.shared.lock().await;
            if shared.location.is_none() {
                return Err(Error::NotStarted(format!(
                    "refresh on {} poller before start",
                    self.adapter_name()
                )));
            }
        }
        Ok(run_cycle(&self.inner, Trigger::Refresh).await)
    }

    /// Stop and restart on a new location. Ignored when the poller is not
    /// active. Registry-owned pollers move through
    /// [`PollerRegistry::relocate`](crate::PollerRegistry::relocate).
    pub async fn update_location(&self, location: Coordinates) -> CycleOutcome {
        {
            let shared = self.inner.shared.lock().await;
            if !shared.state.is_active {
                return CycleOutcome::Skipped(SkipReason::Inactive);
            }
            if shared.pinned.is_some_and(|p| !p.same_location(&location)) {
                return CycleOutcome::Skipped(SkipReason::Pinned);
            }
        }
        self.stop().await;
        self.start(location).await
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> PollerState {
        self.inner.shared.lock().await.state.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.shared.lock().await.state.is_active
    }

    pub async fn connection(&self) -> ConnectionState {
        self.inner.shared.lock().await.state.connection
    }

    pub async fn last_reading(&self) -> Option<Reading> {
        self.inner.shared.lock().await.state.last_reading.clone()
    }

    pub async fn location(&self) -> Option<Coordinates> {
        self.inner.shared.lock().await.location
    }
}

// ── Timers ───────────────────────────────────────────────────────────

fn spawn_timer(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let period = inner.config.poll_interval();

    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            boxed_cycle(inner, Trigger::Tick).await;
        }
    })
}

fn spawn_retry(inner: &Arc<Inner>, delay: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        time::sleep(delay).await;
        if let Some(inner) = weak.upgrade() {
            boxed_cycle(inner, Trigger::Retry).await;
        }
    })
}

// The retry task re-enters the cycle that spawned it.
fn boxed_cycle(inner: Arc<Inner>, trigger: Trigger) -> BoxedCycle {
    Box::pin(async move { run_cycle(&inner, trigger).await })
}

// ── Fetch cycle ──────────────────────────────────────────────────────

async fn run_cycle(inner: &Arc<Inner>, trigger: Trigger) -> CycleOutcome {
    let name = inner.adapter.name();

    let (generation, location) = {
        let mut shared = inner.shared.lock().await;
        let now = inner.clock.now_ms();

        if !shared.state.is_active {
            return CycleOutcome::Skipped(SkipReason::Inactive);
        }
        if shared.in_flight {
            debug!("[{}] {:?} skipped: fetch in flight", name, trigger);
            return CycleOutcome::Skipped(SkipReason::InFlight);
        }
        if let Err(reason) = shared.state.admit(trigger, now, &inner.config) {
            debug!("[{}] {:?} skipped: {:?}", name, trigger, reason);
            return CycleOutcome::Skipped(reason);
        }
        let Some(location) = shared.location else {
            return CycleOutcome::Skipped(SkipReason::Inactive);
        };

        if trigger == Trigger::Retry {
            // This task is the pending retry; detach its own handle.
            shared.retry = None;
        } else {
            shared.cancel_retry();
        }

        shared.state.begin_fetch(trigger, now);
        shared.in_flight = true;
        (shared.generation, location)
    };

    let max_plausible = inner.config.max_plausible_value;
    let result = match location.validate() {
        Err(e) => Err(e),
        Ok(()) => inner
            .adapter
            .fetch_current(location)
            .await
            .and_then(|reading| reading.validate(max_plausible).map(|()| reading)),
    };

    let mut shared = inner.shared.lock().await;
    if shared.generation != generation {
        debug!(
            "[{}] discarding late response for {}",
            name,
            location.cache_key()
        );
        return CycleOutcome::Skipped(SkipReason::Superseded);
    }
    shared.in_flight = false;

    match result {
        Ok(reading) => {
            let outcome = shared.state.apply_success(reading);
            inner.subscribers.connection(outcome.connection);
            match outcome.updated {
                Some(reading) => {
                    debug!(
                        "[{}] {} → {:.0} ({})",
                        name,
                        location.cache_key(),
                        reading.value,
                        reading.source_name
                    );
                    inner.subscribers.update(&reading);
                    CycleOutcome::Updated(reading)
                }
                None => CycleOutcome::Unchanged,
            }
        }
        Err(err) => {
            let outcome = shared.state.apply_failure(&err, &inner.config);
            match outcome.decision {
                FailureDecision::Retry(delay) => {
                    warn!(
                        "[{}] fetch failed for {} (attempt {}/{}), retrying in {}ms: {}",
                        name,
                        location.cache_key(),
                        shared.state.retry_count,
                        inner.config.max_retries,
                        delay.as_millis(),
                        err
                    );
                    shared.cancel_retry();
                    shared.retry = Some(spawn_retry(inner, delay));
                }
                FailureDecision::GiveUp => {
                    warn!(
                        "[{}] giving up on {} after {} retries: {}",
                        name,
                        location.cache_key(),
                        inner.config.max_retries,
                        err
                    );
                }
                FailureDecision::Halt => {
                    warn!(
                        "[{}] halting {} until reconfigured: {}",
                        name,
                        location.cache_key(),
                        err
                    );
                }
            }
            inner.subscribers.connection(outcome.connection);
            inner.subscribers.error(&err);
            CycleOutcome::Failed(err)
        }
    }
}
