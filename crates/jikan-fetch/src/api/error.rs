//! Upstream failure taxonomy.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// How a failed request should be handled by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream is throttling us; back off and fall back to cached data
    RateLimited,
    /// Timeout, dropped connection or 5xx; a later retry may succeed
    Transient,
    /// Bad parameters, other 4xx or an unusable payload; retrying won't help
    Client,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::Client => "client",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while fetching from the upstream API
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request queue is no longer running")]
    QueueClosed,
}

impl FetchError {
    /// Build an error from a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            FetchError::RateLimited
        } else {
            FetchError::Status {
                status,
                message: message.into(),
            }
        }
    }

    /// Classify this error for backoff and fallback handling
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimited => FailureKind::RateLimited,
            FetchError::Timeout(_) | FetchError::Network(_) | FetchError::QueueClosed => {
                FailureKind::Transient
            }
            FetchError::Status { status, .. } if *status >= 500 => FailureKind::Transient,
            FetchError::Status { status: 408, .. } => FailureKind::Transient,
            FetchError::Status { .. } | FetchError::Decode(_) | FetchError::InvalidRequest(_) => {
                FailureKind::Client
            }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == FailureKind::RateLimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(FetchError::from_status(429, "").kind(), FailureKind::RateLimited);
        assert_eq!(FetchError::from_status(500, "boom").kind(), FailureKind::Transient);
        assert_eq!(FetchError::from_status(503, "busy").kind(), FailureKind::Transient);
        assert_eq!(FetchError::from_status(408, "slow").kind(), FailureKind::Transient);
        assert_eq!(FetchError::from_status(404, "missing").kind(), FailureKind::Client);
        assert_eq!(FetchError::from_status(400, "bad").kind(), FailureKind::Client);
    }

    #[test]
    fn test_transport_classification() {
        assert_eq!(
            FetchError::Timeout(Duration::from_secs(15)).kind(),
            FailureKind::Transient
        );
        assert_eq!(FetchError::Network("reset".into()).kind(), FailureKind::Transient);
        assert_eq!(FetchError::Decode("not json".into()).kind(), FailureKind::Client);
        assert!(FetchError::RateLimited.is_rate_limited());
    }

    #[test]
    fn test_error_messages() {
        let err = FetchError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timed out after 1500ms");

        let err = FetchError::from_status(404, "Resource does not exist");
        assert_eq!(
            err.to_string(),
            "Upstream returned status 404: Resource does not exist"
        );
    }
}
