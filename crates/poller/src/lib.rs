//! Rate-limited polling of current readings.
//!
//! A [`Poller`] drives one location through one [`common::FetchAdapter`]:
//! an immediate fetch on start, a fixed-interval timer after that,
//! exponential backoff on failure, and change-suppressed notifications to
//! [`Subscriber`]s. [`PollerRegistry`] hands out one poller per
//! (location, adapter) pair.

pub mod clock;
pub mod poller;
pub mod registry;
pub mod state;
pub mod subscriber;

pub use clock::TokioClock;
pub use poller::Poller;
pub use registry::PollerRegistry;
pub use state::{CycleOutcome, PollerState, SkipReason, Trigger};
pub use subscriber::{ChannelSubscriber, PollerEvent, Subscriber, SubscriptionId};
