//! Retry scheduler (§4.F): delayed re-enqueue with exponential backoff and
//! jitter, and the pending-retry set that makes shutdown drain correct.
//!
//! The pending-retry set is the synchronization primitive for shutdown
//! correctness (§4.J, §9): a scheduled retry is tracked by an id until
//! either its timer fires or shutdown reclaims it. Whichever side performs
//! the atomic `remove` first owns the event; the loser does nothing.

use crate::backoff::Backoff;
use crate::event::{Event, QueuedEvent};
use crate::jitter::Jitter;
use crate::metrics::Metrics;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::spillover::SpilloverStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type LossCallback = Arc<dyn Fn(Event, &'static str) + Send + Sync>;

pub struct RetryScheduler {
    pending: Arc<DashMap<u64, QueuedEvent>>,
    next_id: AtomicU64,
    requeue: mpsc::Sender<QueuedEvent>,
    spillover: Option<Arc<SpilloverStore>>,
    metrics: Arc<Metrics>,
    on_event_loss: LossCallback,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    shutting_down: AtomicBool,
}

impl RetryScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        requeue: mpsc::Sender<QueuedEvent>,
        spillover: Option<Arc<SpilloverStore>>,
        metrics: Arc<Metrics>,
        on_event_loss: LossCallback,
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            requeue,
            spillover,
            metrics,
            on_event_loss,
            max_retries,
            base_delay,
            max_delay,
            jitter: Jitter::bounded(0.25),
            sleeper: Arc::new(TokioSleeper),
            shutting_down: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Per-event failure path (§4.F). `queued.attempts` is the attempt that
    /// just failed (`k`).
    pub async fn handle_failure(self: &Arc<Self>, queued: QueuedEvent) {
        let k = queued.attempts;
        if self.shutting_down.load(Ordering::Acquire) {
            self.terminal_loss(queued.event, "retry_executor_rejected").await;
            return;
        }

        if (k as u32) < self.max_retries {
            let delay = self.jitter.apply(Backoff::exponential(self.base_delay)
                .with_max(self.max_delay)
                .delay((k + 1) as usize));
            self.schedule(queued, delay);
        } else {
            self.terminal_loss(queued.event, "retries_exhausted").await;
        }
    }

    /// Reroute a batch that hit an open circuit breaker: no attempt
    /// increment, a fixed delay tied to the breaker's reset window rather
    /// than the exponential per-event schedule.
    pub async fn reroute_circuit_open(self: &Arc<Self>, queued: QueuedEvent, delay: Duration) {
        if self.shutting_down.load(Ordering::Acquire) {
            self.terminal_loss(queued.event, "retry_executor_rejected").await;
            return;
        }
        if let Some(store) = &self.spillover {
            if store.offer(queued.clone()).is_err() {
                self.terminal_loss(queued.event, "spillover_queue_full").await;
            }
        } else {
            self.schedule(queued, delay);
        }
    }

    fn schedule(self: &Arc<Self>, queued: QueuedEvent, delay: Duration) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(id, queued.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.sleeper.sleep(delay).await;
            if let Some((_, queued)) = this.pending.remove(&id) {
                let next = queued.next_attempt();
                if this.requeue.try_send(next).is_err() {
                    // queue full again; spill or lose the retried event.
                    if let Some(store) = &this.spillover {
                        if store.offer(queued.clone()).is_ok() {
                            return;
                        }
                    }
                    this.terminal_loss(queued.event, "retry_requeue_failed").await;
                }
            }
            // else: shutdown already claimed this id, nothing to do.
        });
    }

    async fn terminal_loss(&self, event: Event, reason: &'static str) {
        if let Some(store) = &self.spillover {
            if store.offer(QueuedEvent::new(event.clone())).is_ok() {
                return;
            }
        }
        self.metrics.record_failed(1);
        (self.on_event_loss)(event, reason);
    }

    /// Stop accepting new schedules (§4.J step 2) — `handle_failure` calls
    /// arriving after this report `retry_executor_rejected` immediately
    /// instead of scheduling a delayed re-enqueue.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    /// Drain the pending-retry set, spilling or reporting loss for every
    /// event still tracked — the shutdown sequence's step 4 (§4.J). The
    /// atomic `remove` on each id is the CAS gate described in §9: whichever
    /// of {this drain, the event's own retry timer} removes first owns the
    /// event.
    pub async fn drain_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, queued)) = self.pending.remove(&id) {
                self.terminal_loss(queued.event, "shutdown_pending_retry").await;
            }
        }
    }

    /// Convenience combining `begin_shutdown` + `drain_pending` for callers
    /// that don't need a grace window between the two (e.g. tests).
    pub async fn shutdown_drain(&self) {
        self.begin_shutdown();
        self.drain_pending().await;
    }
}
