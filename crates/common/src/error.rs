//! Unified error types for aqi-sync.
//!
//! `FetchError` is what providers hand back and what subscribers see.
//! `Error` is the crate-wide type for configuration and contract failures.

use thiserror::Error;

/// Maximum length for upstream bodies carried in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Poller not started: {0}")]
    NotStarted(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure class used to drive retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, resets, 5xx.
    Transient,
    /// Explicit upstream backpressure.
    RateLimited,
    /// Bad coordinates, missing credentials, malformed request.
    Client,
    /// Payload missing fields or physically implausible.
    Validation,
}

/// A failed fetch, as reported by a `FetchAdapter`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Upstream error (status={status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid payload: {0}")]
    Validation(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::Upstream { .. } => {
                FailureKind::Transient
            }
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::InvalidRequest(_) | FetchError::Unauthorized(_) => FailureKind::Client,
            FetchError::Validation(_) => FailureKind::Validation,
        }
    }

    /// Everything except client/configuration errors is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() != FailureKind::Client
    }

    /// Provider-supplied retry-after hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            FetchError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status {
            401 | 403 => FetchError::Unauthorized(truncated),
            408 => FetchError::Timeout(truncated),
            429 => FetchError::RateLimited {
                retry_after_ms: None,
            },
            500..=599 => FetchError::Upstream {
                status,
                message: truncated,
            },
            _ => FetchError::InvalidRequest(format!("status {}: {}", status, truncated)),
        }
    }
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {}ms", ms),
        None => String::new(),
    }
}

fn truncate_body(body: &str) -> String {
    let compact = body.replace(['\n', '\r'], " ");
    if compact.chars().count() <= MAX_ERROR_BODY_LENGTH {
        compact
    } else {
        let head: String = compact.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}… (truncated)", head)
    }
}
