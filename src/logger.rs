//! `AsyncEventLogger` (§6): the public composition root. Application code
//! depends on this type alone — `log`/`log_many`/`flush`/`shutdown` plus the
//! observability reads (`queue_depth`, `circuit_open`, `metrics`) are the
//! entire surface; every worker wired up inside `build` is private.

use crate::api_client::ApiClient;
use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitState};
use crate::config::{EventLoggerConfig, OAuthConfig};
use crate::error::EventLoggerError;
use crate::event::{Event, QueuedEvent};
use crate::lifecycle::LifecycleSupervisor;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::EventQueue;
use crate::replay::ReplayScheduler;
use crate::retry_scheduler::{LossCallback, RetryScheduler};
use crate::sender::Sender;
use crate::spillover::SpilloverStore;
use crate::token_provider::{OAuthTokenProvider, StaticTokenProvider, TokenProvider};
use crate::transport::{HttpTransport, Transport};
use std::sync::Arc;
use std::time::Duration;

/// Used when the host installs no `on_event_loss` callback — §7 requires a
/// WARN log rather than a silent drop in that case.
fn default_loss_handler() -> LossCallback {
    Arc::new(|event: Event, reason: &'static str| {
        tracing::warn!(
            correlation_id = event.correlation_id().unwrap_or(""),
            process_name = event.process_name().unwrap_or(""),
            reason,
            "event lost"
        );
    })
}

pub struct AsyncEventLogger {
    config: EventLoggerConfig,
    queue: Arc<EventQueue>,
    metrics: Arc<Metrics>,
    breaker: Arc<CircuitBreakerPolicy>,
    retry_scheduler: Arc<RetryScheduler>,
    spillover: Option<Arc<SpilloverStore>>,
    lifecycle: Arc<LifecycleSupervisor>,
    on_event_loss: LossCallback,
}

impl AsyncEventLogger {
    /// Build and start a logger against an arbitrary `Transport`/`TokenProvider`
    /// pair. Tests substitute deterministic doubles for both.
    pub async fn new(
        base_url: impl Into<String>,
        config: EventLoggerConfig,
        transport: Arc<dyn Transport>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<Arc<Self>, EventLoggerError> {
        Self::build(base_url, config, transport, token_provider, None).await
    }

    /// As `new`, installing a host callback for event-loss notifications
    /// up front (§6 `onEventLoss`).
    pub async fn with_event_loss_handler(
        base_url: impl Into<String>,
        config: EventLoggerConfig,
        transport: Arc<dyn Transport>,
        token_provider: Arc<dyn TokenProvider>,
        on_event_loss: LossCallback,
    ) -> Result<Arc<Self>, EventLoggerError> {
        Self::build(base_url, config, transport, token_provider, Some(on_event_loss)).await
    }

    /// `reqwest`-backed transport with a fixed bearer token.
    pub async fn with_static_token(
        base_url: impl Into<String>,
        config: EventLoggerConfig,
        token: impl Into<String>,
    ) -> Result<Arc<Self>, EventLoggerError> {
        let token_provider = Arc::new(StaticTokenProvider::new(token)?);
        Self::new(base_url, config, Arc::new(HttpTransport::new()), token_provider).await
    }

    /// `reqwest`-backed transport with OAuth2 client-credentials token
    /// refresh (§4.B).
    pub async fn with_oauth(
        base_url: impl Into<String>,
        config: EventLoggerConfig,
        oauth_config: OAuthConfig,
    ) -> Result<Arc<Self>, EventLoggerError> {
        let token_provider = Arc::new(OAuthTokenProvider::new(oauth_config));
        Self::new(base_url, config, Arc::new(HttpTransport::new()), token_provider).await
    }

    async fn build(
        base_url: impl Into<String>,
        config: EventLoggerConfig,
        transport: Arc<dyn Transport>,
        token_provider: Arc<dyn TokenProvider>,
        on_event_loss: Option<LossCallback>,
    ) -> Result<Arc<Self>, EventLoggerError> {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(EventQueue::new(config.queue_capacity));
        let on_event_loss = on_event_loss.unwrap_or_else(default_loss_handler);

        let spillover = match &config.spillover_path {
            Some(path) => Some(
                SpilloverStore::new(
                    path,
                    config.max_spillover_events,
                    config.max_spillover_bytes,
                    metrics.clone(),
                    on_event_loss.clone(),
                )
                .await?,
            ),
            None => None,
        };

        let api_client = Arc::new(ApiClient::new(
            transport,
            token_provider,
            base_url,
            config.api_request_timeout,
        ));
        let breaker =
            Arc::new(CircuitBreakerPolicy::new(config.circuit_breaker_threshold, config.circuit_breaker_reset));

        let retry_scheduler = Arc::new(RetryScheduler::new(
            queue.sender_handle(),
            spillover.clone(),
            metrics.clone(),
            on_event_loss.clone(),
            config.max_retries,
            config.base_retry_delay,
            config.max_retry_delay,
        ));

        let lifecycle = Arc::new(LifecycleSupervisor::new());

        let mut sender_handles = Vec::with_capacity(config.sender_threads);
        for _ in 0..config.sender_threads {
            let sender = Arc::new(Sender::new(
                queue.clone(),
                api_client.clone(),
                breaker.clone(),
                retry_scheduler.clone(),
                spillover.clone(),
                metrics.clone(),
                config.batch_size,
                config.max_batch_wait,
                config.circuit_breaker_reset,
            ));
            sender_handles.push(sender.spawn());
        }
        lifecycle.register_senders(sender_handles).await;

        if let Some(store) = &spillover {
            let replay = Arc::new(ReplayScheduler::new(
                store.clone(),
                api_client.clone(),
                breaker.clone(),
                metrics.clone(),
                config.replay_interval,
            ));
            lifecycle.register_replay(replay.spawn()).await;
        }

        let logger = Arc::new(Self {
            config,
            queue,
            metrics,
            breaker,
            retry_scheduler,
            spillover,
            lifecycle,
            on_event_loss,
        });

        if logger.config.register_shutdown_hook {
            let hook_logger = Arc::clone(&logger);
            logger
                .lifecycle
                .register_shutdown_hook(move || async move {
                    hook_logger.shutdown().await;
                })
                .await;
        }

        Ok(logger)
    }

    /// Non-blocking enqueue (§6 `log`). `false` means the event was dropped;
    /// the configured callback (or a WARN log) has already recorded why.
    pub fn log(&self, event: Event) -> bool {
        if self.lifecycle.is_shutting_down() {
            self.report_loss(event, "shutdown_in_progress");
            return false;
        }
        let for_loss = event.clone();
        if self.queue.try_offer(QueuedEvent::new(event)) {
            self.metrics.record_queued(1);
            true
        } else {
            self.report_loss(for_loss, "queue_full");
            false
        }
    }

    /// Enqueue a batch one at a time; returns how many were accepted
    /// (§6 `logMany`).
    pub fn log_many(&self, events: Vec<Event>) -> usize {
        events.into_iter().filter(|event| self.log(event.clone())).count()
    }

    /// Block up to `timeout` for the queue to drain; `true` only if it is
    /// empty by the deadline (§6 `flush`).
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.queue.depth() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Idempotent graceful drain (§4.J, §6 `shutdown`/`close`).
    pub async fn shutdown(&self) {
        self.lifecycle
            .run_shutdown(
                &self.queue,
                &self.metrics,
                &self.retry_scheduler,
                self.spillover.as_ref(),
                &self.on_event_loss,
                self.config.shutdown_grace_period,
            )
            .await;
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn circuit_open(&self) -> bool {
        self.breaker.state() == CircuitState::Open
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.queue.depth() as u64)
    }

    fn report_loss(&self, event: Event, reason: &'static str) {
        self.metrics.record_failed(1);
        (self.on_event_loss)(event, reason);
    }
}
