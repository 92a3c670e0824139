//! Shared types, config, clock and error definitions for aqi-sync.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use adapter::FetchAdapter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use error::{Error, FailureKind, FetchError};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
