//! Configuration for the event logger and its OAuth token provider.

use crate::error::EventLoggerError;
use std::time::Duration;

/// Recognized configuration for an `AsyncEventLogger` instance.
///
/// Durations are `std::time::Duration` at this boundary; the millisecond
/// figures quoted in documentation are wire/legacy-default values, not the
/// Rust type.
#[derive(Debug, Clone)]
pub struct EventLoggerConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub max_batch_wait: Duration,
    pub sender_threads: usize,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub circuit_breaker_threshold: usize,
    pub circuit_breaker_reset: Duration,
    pub spillover_path: Option<std::path::PathBuf>,
    pub max_spillover_events: usize,
    pub max_spillover_bytes: u64,
    pub replay_interval: Duration,
    pub register_shutdown_hook: bool,
    pub api_request_timeout: Duration,
    pub shutdown_grace_period: Duration,
}

impl EventLoggerConfig {
    pub fn builder() -> EventLoggerConfigBuilder {
        EventLoggerConfigBuilder::new()
    }
}

impl Default for EventLoggerConfig {
    fn default() -> Self {
        EventLoggerConfigBuilder::new().build().expect("defaults are valid")
    }
}

pub struct EventLoggerConfigBuilder {
    queue_capacity: usize,
    batch_size: usize,
    max_batch_wait: Duration,
    sender_threads: usize,
    max_retries: u32,
    base_retry_delay: Duration,
    max_retry_delay: Duration,
    circuit_breaker_threshold: usize,
    circuit_breaker_reset: Duration,
    spillover_path: Option<std::path::PathBuf>,
    max_spillover_events: usize,
    max_spillover_bytes: u64,
    replay_interval: Duration,
    register_shutdown_hook: bool,
    api_request_timeout: Duration,
    shutdown_grace_period: Duration,
}

impl EventLoggerConfigBuilder {
    pub fn new() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 50,
            max_batch_wait: Duration::from_millis(100),
            sender_threads: 1,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_millis(30_000),
            circuit_breaker_threshold: 5,
            circuit_breaker_reset: Duration::from_millis(30_000),
            spillover_path: None,
            max_spillover_events: 10_000,
            max_spillover_bytes: 50 * 1024 * 1024,
            replay_interval: Duration::from_millis(10_000),
            register_shutdown_hook: true,
            api_request_timeout: Duration::from_millis(10_000),
            shutdown_grace_period: Duration::from_secs(30),
        }
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn max_batch_wait(mut self, d: Duration) -> Self {
        self.max_batch_wait = d;
        self
    }

    pub fn sender_threads(mut self, n: usize) -> Self {
        self.sender_threads = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn base_retry_delay(mut self, d: Duration) -> Self {
        self.base_retry_delay = d;
        self
    }

    pub fn max_retry_delay(mut self, d: Duration) -> Self {
        self.max_retry_delay = d;
        self
    }

    pub fn circuit_breaker_threshold(mut self, n: usize) -> Self {
        self.circuit_breaker_threshold = n;
        self
    }

    pub fn circuit_breaker_reset(mut self, d: Duration) -> Self {
        self.circuit_breaker_reset = d;
        self
    }

    pub fn spillover_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.spillover_path = Some(path.into());
        self
    }

    pub fn max_spillover_events(mut self, n: usize) -> Self {
        self.max_spillover_events = n;
        self
    }

    pub fn max_spillover_bytes(mut self, n: u64) -> Self {
        self.max_spillover_bytes = n;
        self
    }

    pub fn replay_interval(mut self, d: Duration) -> Self {
        self.replay_interval = d;
        self
    }

    pub fn register_shutdown_hook(mut self, enabled: bool) -> Self {
        self.register_shutdown_hook = enabled;
        self
    }

    pub fn api_request_timeout(mut self, d: Duration) -> Self {
        self.api_request_timeout = d;
        self
    }

    /// How long `shutdown()` waits for senders to drain the queue before
    /// moving on to reclaiming pending retries and spilling the rest
    /// (§4.J step 3). Not part of the cross-language config table — a
    /// Rust-native addition, same as `api_request_timeout`.
    pub fn shutdown_grace_period(mut self, d: Duration) -> Self {
        self.shutdown_grace_period = d;
        self
    }

    pub fn build(self) -> Result<EventLoggerConfig, EventLoggerError> {
        if self.batch_size == 0 {
            return Err(EventLoggerError::Config("batch_size must be > 0".into()));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(EventLoggerError::Config(
                "circuit_breaker_threshold must be > 0".into(),
            ));
        }
        if self.max_retry_delay < self.base_retry_delay {
            return Err(EventLoggerError::Config(
                "max_retry_delay must be >= base_retry_delay".into(),
            ));
        }
        Ok(EventLoggerConfig {
            queue_capacity: self.queue_capacity,
            batch_size: self.batch_size,
            max_batch_wait: self.max_batch_wait,
            sender_threads: self.sender_threads,
            max_retries: self.max_retries,
            base_retry_delay: self.base_retry_delay,
            max_retry_delay: self.max_retry_delay,
            circuit_breaker_threshold: self.circuit_breaker_threshold,
            circuit_breaker_reset: self.circuit_breaker_reset,
            spillover_path: self.spillover_path,
            max_spillover_events: self.max_spillover_events,
            max_spillover_bytes: self.max_spillover_bytes,
            replay_interval: self.replay_interval,
            register_shutdown_hook: self.register_shutdown_hook,
            api_request_timeout: self.api_request_timeout,
            shutdown_grace_period: self.shutdown_grace_period,
        })
    }
}

impl Default for EventLoggerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs for the OAuth2 client-credentials token provider (§4.B).
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    pub refresh_buffer: Duration,
    pub request_timeout: Duration,
}

impl OAuthConfig {
    pub fn builder(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> OAuthConfigBuilder {
        OAuthConfigBuilder::new(token_url, client_id, client_secret)
    }
}

pub struct OAuthConfigBuilder {
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    refresh_buffer: Duration,
    request_timeout: Duration,
}

impl OAuthConfigBuilder {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            refresh_buffer: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn refresh_buffer(mut self, d: Duration) -> Self {
        self.refresh_buffer = d;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn build(self) -> Result<OAuthConfig, EventLoggerError> {
        if self.token_url.is_empty() {
            return Err(EventLoggerError::Config("token_url must not be empty".into()));
        }
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(EventLoggerError::Config(
                "client_id and client_secret must not be empty".into(),
            ));
        }
        Ok(OAuthConfig {
            token_url: self.token_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            scope: self.scope,
            refresh_buffer: self.refresh_buffer,
            request_timeout: self.request_timeout,
        })
    }
}
