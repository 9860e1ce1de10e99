//! Sender loop workers (§4.E): drain batches from the queue, gate dispatch
//! through the circuit breaker, and route per-event outcomes to the retry
//! scheduler or the spillover store.

use crate::api_client::ApiClient;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::event::{Batch, BatchResult, QueuedEvent};
use crate::metrics::Metrics;
use crate::queue::EventQueue;
use crate::retry_scheduler::RetryScheduler;
use crate::spillover::SpilloverStore;
use crate::ResilienceError;
use std::sync::Arc;
use std::time::Duration;

pub struct Sender {
    queue: Arc<EventQueue>,
    api_client: Arc<ApiClient>,
    breaker: Arc<CircuitBreakerPolicy>,
    retry_scheduler: Arc<RetryScheduler>,
    spillover: Option<Arc<SpilloverStore>>,
    metrics: Arc<Metrics>,
    batch_size: usize,
    max_batch_wait: Duration,
    circuit_reset: Duration,
}

impl Sender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<EventQueue>,
        api_client: Arc<ApiClient>,
        breaker: Arc<CircuitBreakerPolicy>,
        retry_scheduler: Arc<RetryScheduler>,
        spillover: Option<Arc<SpilloverStore>>,
        metrics: Arc<Metrics>,
        batch_size: usize,
        max_batch_wait: Duration,
        circuit_reset: Duration,
    ) -> Self {
        Self {
            queue,
            api_client,
            breaker,
            retry_scheduler,
            spillover,
            metrics,
            batch_size,
            max_batch_wait,
            circuit_reset,
        }
    }

    /// Runs until the lifecycle supervisor aborts the returned handle
    /// (§4.J step 6) — the loop itself never self-terminates, so a grace
    /// window for draining the queue is just "don't abort yet".
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let batch = self.queue.drain_up_to(self.batch_size, self.max_batch_wait).await;
                if batch.is_empty() {
                    continue;
                }
                self.process_batch(batch).await;
            }
        })
    }

    async fn process_batch(&self, batch: Batch) {
        let events: Vec<_> = batch.iter().map(|q| q.event.clone()).collect();
        let is_batch = events.len() > 1;

        let outcome = self
            .breaker
            .execute(|| {
                let api_client = Arc::clone(&self.api_client);
                let events = events.clone();
                async move {
                    if events.len() > 1 {
                        api_client.create_events(&events).await.map(|resp| {
                            if resp.errors.is_empty() {
                                BatchResult::AllSuccess
                            } else {
                                BatchResult::PartialFailure {
                                    failed_indices: resp
                                        .errors
                                        .into_iter()
                                        .map(|e| (e.index, e.error))
                                        .collect(),
                                }
                            }
                        })
                        .map_err(ResilienceError::Inner)
                    } else {
                        api_client
                            .create_event(&events[0])
                            .await
                            .map(|_| BatchResult::AllSuccess)
                            .map_err(ResilienceError::Inner)
                    }
                }
            })
            .await;

        self.metrics.set_circuit_open(self.breaker.state() == crate::circuit_breaker::CircuitState::Open);

        match outcome {
            Ok(BatchResult::AllSuccess) => {
                self.metrics.record_sent(batch.len() as u64);
            }
            Ok(BatchResult::PartialFailure { failed_indices }) => {
                let failed: std::collections::HashMap<usize, String> = failed_indices.into_iter().collect();
                self.metrics.record_sent((batch.len() - failed.len()) as u64);
                for (i, queued) in batch.into_iter().enumerate() {
                    if let Some(error) = failed.get(&i) {
                        tracing::warn!(index = i, error = %error, "batch entry failed");
                        self.retry_scheduler.handle_failure(queued).await;
                    }
                }
            }
            Ok(BatchResult::TotalFailure { .. }) => {
                unreachable!("the dispatch closure only ever produces AllSuccess or PartialFailure")
            }
            Err(ResilienceError::CircuitOpen { .. }) => {
                for queued in batch {
                    self.reroute_circuit_open(queued).await;
                }
            }
            Err(ResilienceError::Inner(e)) => {
                if let BatchResult::TotalFailure { error } = (BatchResult::TotalFailure { error: e.to_string() }) {
                    tracing::warn!(error = %error, "batch dispatch failed outright");
                }
                if is_batch {
                    for queued in batch {
                        self.retry_scheduler.handle_failure(queued).await;
                    }
                } else {
                    self.retry_scheduler.handle_failure(batch.into_iter().next().unwrap()).await;
                }
            }
            Err(_) => unreachable!("sender only wraps calls that produce Inner or CircuitOpen"),
        }
    }

    async fn reroute_circuit_open(&self, queued: QueuedEvent) {
        if let Some(store) = &self.spillover {
            if store.offer(queued.clone()).is_err() {
                self.metrics.record_failed(1);
            }
        } else {
            self.retry_scheduler.reroute_circuit_open(queued, self.circuit_reset).await;
        }
    }
}
