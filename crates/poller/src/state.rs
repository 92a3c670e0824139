//! Poller state machine for a single (location, adapter) pair.
//!
//! `idle → fetching → {success → idle, failure → backoff → fetching | giveup}`
//!
//! Everything here is synchronous and clock-free: callers pass `now_ms`
//! in, and get back what to notify and whether to schedule a retry. The
//! async driver in `poller.rs` owns timers and the in-flight guard.

use std::time::Duration;

use common::config::PollerConfig;
use common::{ConnectionState, FetchError, Reading};

/// What started a fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The synchronous first fetch performed by `start`.
    Initial,
    /// The recurring poll timer.
    Tick,
    /// A caller-forced `refresh`.
    Refresh,
    /// A one-shot backoff retry.
    Retry,
}

impl Trigger {
    /// Everything but a backoff retry is held back by `min_fetch_interval`
    /// and restarts the gate window. Retries are bounded by `max_retries`.
    pub fn is_gated(self) -> bool {
        self != Trigger::Retry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not started, or stopped.
    Inactive,
    /// Another fetch for this poller is outstanding.
    InFlight,
    /// Inside `min_fetch_interval` of the previous fetch.
    Gated,
    /// A non-retryable failure is waiting for a configuration change.
    Halted,
    /// `start` for the location already being polled.
    AlreadyActive,
    /// The response arrived after `stop` or a location change.
    Superseded,
    /// The poller belongs to a registry entry for a different location.
    Pinned,
}

/// Result of one pass through the fetch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Fetched a materially different reading; subscribers were notified.
    Updated(Reading),
    /// Fetched a reading equal to the last one; notification suppressed.
    Unchanged,
    Failed(FetchError),
    Skipped(SkipReason),
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Schedule a one-shot retry after the delay.
    Retry(Duration),
    /// Retries for this episode are exhausted; wait for the regular timer.
    GiveUp,
    /// Non-retryable; stop fetching until configuration changes.
    Halt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuccessOutcome {
    /// Present when subscribers should see the reading.
    pub updated: Option<Reading>,
    pub connection: Option<ConnectionState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureOutcome {
    pub decision: FailureDecision,
    pub connection: Option<ConnectionState>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerState {
    pub is_active: bool,
    pub last_reading: Option<Reading>,
    pub retry_count: u32,
    /// Start time of the last gated fetch (epoch ms). Cleared on a
    /// location change.
    pub last_fetch_at: Option<i64>,
    pub connection: ConnectionState,
    pub halted: bool,
    /// The current failure episode ran out of retries.
    pub gave_up: bool,
}

impl PollerState {
    pub fn fetch_allowed(&self, now_ms: i64, min_fetch_interval_ms: u64) -> bool {
        match self.last_fetch_at {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= min_fetch_interval_ms as i64,
        }
    }

    /// Decide whether a cycle may proceed. Does not consider the in-flight
    /// guard, which lives with the driver.
    pub fn admit(&self, trigger: Trigger, now_ms: i64, config: &PollerConfig) -> Result<(), SkipReason> {
        if !self.is_active {
            return Err(SkipReason::Inactive);
        }
        if self.halted {
            return Err(SkipReason::Halted);
        }
        if trigger.is_gated() && !self.fetch_allowed(now_ms, config.min_fetch_interval_ms) {
            return Err(SkipReason::Gated);
        }
        Ok(())
    }

    /// Record that a fetch is starting.
    pub fn begin_fetch(&mut self, trigger: Trigger, now_ms: i64) {
        if trigger.is_gated() {
            self.last_fetch_at = Some(now_ms);
            if self.gave_up {
                // A scheduled fetch after give-up opens a new episode.
                self.gave_up = false;
                self.retry_count = 0;
            }
        }
    }

    /// Forget everything tied to the previous location, including the
    /// gate window, so the first fetch for a new place is not held back.
    pub fn reset_for_new_location(&mut self) {
        self.last_reading = None;
        self.last_fetch_at = None;
        self.retry_count = 0;
        self.gave_up = false;
        self.halted = false;
    }

    /// Returns the new state when it actually changed.
    pub fn set_connection(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.connection == next {
            None
        } else {
            self.connection = next;
            Some(next)
        }
    }

    pub fn apply_success(&mut self, reading: Reading) -> SuccessOutcome {
        self.retry_count = 0;
        self.gave_up = false;
        let connection = self.set_connection(ConnectionState::Connected);

        let material = match &self.last_reading {
            None => true,
            Some(previous) => reading.is_material_change(previous),
        };

        let updated = if material {
            self.last_reading = Some(reading.clone());
            Some(reading)
        } else {
            None
        };

        SuccessOutcome {
            updated,
            connection,
        }
    }

    /// Classify a failure. `last_reading` is never touched here, so the
    /// last known-good value survives any failure class.
    pub fn apply_failure(&mut self, error: &FetchError, config: &PollerConfig) -> FailureOutcome {
        if !error.is_retryable() {
            self.halted = true;
            return FailureOutcome {
                decision: FailureDecision::Halt,
                connection: self.set_connection(ConnectionState::Disconnected),
            };
        }

        if self.retry_count < config.max_retries {
            self.retry_count += 1;
            let delay = error
                .retry_after_ms()
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.backoff_delay(self.retry_count));
            FailureOutcome {
                decision: FailureDecision::Retry(delay),
                connection: self.set_connection(ConnectionState::Connecting),
            }
        } else {
            self.gave_up = true;
            FailureOutcome {
                decision: FailureDecision::GiveUp,
                connection: self.set_connection(ConnectionState::Disconnected),
            }
        }
    }
}
