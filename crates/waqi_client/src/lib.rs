//! World Air Quality Index (aqicn.org) provider.
//!
//! [`WaqiClient`] implements [`common::FetchAdapter`] over the WAQI JSON
//! API, with a client-side rate limit.

pub mod models;
pub mod rate_limit;
pub mod rest;

pub use rate_limit::RateLimiter;
pub use rest::{WaqiClient, ADAPTER_NAME};
