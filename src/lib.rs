#![forbid(unsafe_code)]

//! # eventlogger
//!
//! A resilient asynchronous event-delivery client: a bounded queue fed by
//! application threads, a batching sender loop gated by a circuit breaker,
//! per-event retry with exponential backoff and jitter, bounded disk
//! spillover with background replay, and an OAuth2 client-credentials token
//! provider with single-flight refresh. `AsyncEventLogger` composes all of
//! it behind a small non-blocking API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eventlogger::{AsyncEventLogger, Event, EventLoggerConfig};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EventLoggerConfig::builder()
//!         .queue_capacity(10_000)
//!         .batch_size(50)
//!         .build()?;
//!
//!     let logger =
//!         AsyncEventLogger::with_static_token("https://ingest.example.com", config, "api-token")
//!             .await?;
//!
//!     let mut fields = HashMap::new();
//!     fields.insert("correlation_id".to_string(), serde_json::json!("c1"));
//!     logger.log(Event::new(fields));
//!
//!     logger.flush(Duration::from_secs(5)).await;
//!     logger.shutdown().await;
//!     Ok(())
//! }
//! ```

mod api_client;
mod backoff;
mod circuit_breaker;
mod clock;
mod config;
mod error;
mod event;
mod jitter;
mod lifecycle;
mod logger;
mod metrics;
mod queue;
mod replay;
mod retry_scheduler;
mod sender;
mod sleeper;
mod spillover;
mod token_provider;
mod transport;

// Re-exports
pub use api_client::{ApiClient, BatchErrorEntry, CreateEventResponse, CreateEventsResponse};
pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, MonotonicClock};
pub use config::{EventLoggerConfig, EventLoggerConfigBuilder, OAuthConfig, OAuthConfigBuilder};
pub use error::{EventLoggerError, ResilienceError};
pub use event::{Batch, BatchResult, Event, QueuedEvent};
pub use jitter::Jitter;
pub use logger::AsyncEventLogger;
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry_scheduler::LossCallback;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use token_provider::{OAuthTokenProvider, StaticTokenProvider, TokenProvider};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};

pub mod prelude;
