//! Convenient re-exports for common eventlogger types.
pub use crate::{
    AsyncEventLogger, Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState, Clock,
    Event, EventLoggerConfig, EventLoggerError, Jitter, LossCallback, MetricsSnapshot,
    MonotonicClock, OAuthConfig, OAuthTokenProvider, QueuedEvent, ResilienceError,
    StaticTokenProvider, TokenProvider, Transport, TransportRequest, TransportResponse,
};
