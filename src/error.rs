//! Error types: `ResilienceError<E>` for the internal retry/circuit-breaker
//! policies, and `EventLoggerError` for the public-facing API surface.

use std::fmt;
use std::time::Duration;

/// Error type produced by the circuit breaker's `execute` wrapper (§4.G).
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The circuit breaker is open
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// The underlying operation failed
    Inner(E),
}

impl<E: Clone> Clone for ResilienceError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for ResilienceError<E> {
    fn eq(&self, other: &Self) -> bool {
        use ResilienceError::*;
        match (self, other) {
            (
                CircuitOpen { failure_count: f1, open_duration: d1 },
                CircuitOpen { failure_count: f2, open_duration: d2 },
            ) => f1 == f2 && d1 == d2,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for ResilienceError<E> {}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(
                    f,
                    "circuit breaker open ({} failures, open for {:?})",
                    failure_count, open_duration
                )
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is due to circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Mutably borrow the inner error if present.
    pub fn as_inner_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors surfaced by the synchronous `create_event`/`create_events` API
/// client entry points, the OAuth token provider, and spillover I/O.
///
/// Background paths (the sender loop, retry scheduler, replay scheduler)
/// never propagate these outward — every failure there terminates in a
/// retry, a spillover write, or an `on_event_loss` callback invocation.
#[derive(Debug, thiserror::Error)]
pub enum EventLoggerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error: status {status_code}, code {error_code:?}: {body}")]
    Api { status_code: u16, body: String, error_code: Option<String> },

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("queue is full")]
    QueueFull,

    #[error("spillover bounds exceeded: {0}")]
    SpilloverExhausted(&'static str),

    #[error("retry executor rejected the scheduled retry")]
    RetryExecutorRejected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EventLoggerError {
    /// Whether this error represents an HTTP status the API client should
    /// retry within its own per-request budget (5xx or 429).
    pub fn is_retryable_api_error(&self) -> bool {
        matches!(self, Self::Api { status_code, .. } if *status_code == 429 || *status_code >= 500)
    }
}


#[cfg(test)]
mod event_logger_error_tests {
    use super::*;

    #[test]
    fn retryable_covers_5xx_and_429() {
        let server_error =
            EventLoggerError::Api { status_code: 503, body: String::new(), error_code: None };
        let rate_limited =
            EventLoggerError::Api { status_code: 429, body: String::new(), error_code: None };
        let not_found =
            EventLoggerError::Api { status_code: 404, body: String::new(), error_code: None };

        assert!(server_error.is_retryable_api_error());
        assert!(rate_limited.is_retryable_api_error());
        assert!(!not_found.is_retryable_api_error());
    }

    #[test]
    fn non_api_errors_are_not_retryable() {
        assert!(!EventLoggerError::QueueFull.is_retryable_api_error());
    }
}
