//! Lifecycle Supervisor (§4.J): owns start/stop of the sender, retry,
//! spillover, and replay workers, registers a process-exit hook, and
//! performs the ordered graceful-drain sequence on shutdown.
//!
//! The supervisor itself holds no domain logic — it owns task handles and
//! the two flags (`shutting_down`, `shutdown_started`) that make the drain
//! sequence idempotent and race-safe. `AsyncEventLogger` supplies the
//! domain objects (queue, retry scheduler, spillover store) each time it
//! asks for a drain.

use crate::event::QueuedEvent;
use crate::metrics::Metrics;
use crate::queue::EventQueue;
use crate::retry_scheduler::{LossCallback, RetryScheduler};
use crate::spillover::SpilloverStore;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Grace period for the spillover writer to flush its in-memory queue once
/// shutdown stops feeding it new offers (§4.J step 6).
const SPILLOVER_STOP_GRACE: Duration = Duration::from_secs(5);

/// How often `wait_for_drain` polls queue depth while waiting out the grace
/// window. Small relative to any realistic grace period.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct LifecycleSupervisor {
    shutting_down: Arc<AtomicBool>,
    shutdown_started: AtomicBool,
    sender_handles: Mutex<Vec<JoinHandle<()>>>,
    replay_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_hook: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleSupervisor {
    pub fn new() -> Self {
        Self {
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_started: AtomicBool::new(false),
            sender_handles: Mutex::new(Vec::new()),
            replay_handle: Mutex::new(None),
            shutdown_hook: Mutex::new(None),
        }
    }

    /// `log()`/`log_many()` read this to reject new events with
    /// `shutdown_in_progress` once a drain has begun (§4.J step 1).
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub async fn register_senders(&self, handles: Vec<JoinHandle<()>>) {
        *self.sender_handles.lock().await = handles;
    }

    pub async fn register_replay(&self, handle: JoinHandle<()>) {
        *self.replay_handle.lock().await = Some(handle);
    }

    /// Register a ctrl-c-triggered auto-shutdown (§4.J: "registers a
    /// process-exit hook"). `on_signal` is built by the caller from the
    /// same component handles an explicit `shutdown()` call would use.
    pub async fn register_shutdown_hook<F, Fut>(&self, on_signal: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal().await;
            }
        });
        *self.shutdown_hook.lock().await = Some(handle);
    }

    /// Deregister the exit hook (§4.J step 7) without disturbing a drain
    /// already in flight.
    async fn deregister_shutdown_hook(&self) {
        if let Some(handle) = self.shutdown_hook.lock().await.take() {
            handle.abort();
        }
    }

    /// Flip the shutdown flag and claim ownership of the drain. Returns
    /// `true` only for the caller that should actually perform it —
    /// everyone else (a concurrent or repeated `shutdown()` call) gets
    /// `false` and should treat the drain as already handled. This is what
    /// makes `shutdown()` idempotent (§4.J, §8 "idempotent shutdown").
    fn begin_shutdown(&self) -> bool {
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown_started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    async fn wait_for_drain(&self, queue: &EventQueue, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while queue.depth() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    async fn stop_senders(&self) {
        let handles = std::mem::take(&mut *self.sender_handles.lock().await);
        for handle in handles {
            handle.abort();
        }
    }

    async fn stop_replay(&self) {
        if let Some(handle) = self.replay_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Drain every event still sitting in the queue (§4.J step 5): spill it
    /// if spillover is configured, otherwise report loss.
    async fn drain_queue(
        queue: &EventQueue,
        spillover: Option<&Arc<SpilloverStore>>,
        metrics: &Metrics,
        on_event_loss: &LossCallback,
    ) {
        while let Some(queued) = queue.try_drain_one() {
            Self::spill_or_lose(queued, spillover, metrics, on_event_loss, "shutdown_pending_retry").await;
        }
    }

    async fn spill_or_lose(
        queued: QueuedEvent,
        spillover: Option<&Arc<SpilloverStore>>,
        metrics: &Metrics,
        on_event_loss: &LossCallback,
        reason: &'static str,
    ) {
        if let Some(store) = spillover {
            let event_for_loss = queued.event.clone();
            if store.offer(queued).is_ok() {
                return;
            }
            metrics.record_failed(1);
            on_event_loss(event_for_loss, reason);
            return;
        }
        metrics.record_failed(1);
        on_event_loss(queued.event, reason);
    }

    /// The full ordered drain sequence (§4.J steps 1-7), idempotent via
    /// `begin_shutdown`. Both `AsyncEventLogger::shutdown()` and the
    /// registered ctrl-c hook call this with the same component handles.
    pub async fn run_shutdown(
        &self,
        queue: &EventQueue,
        metrics: &Metrics,
        retry_scheduler: &RetryScheduler,
        spillover: Option<&Arc<SpilloverStore>>,
        on_event_loss: &LossCallback,
        grace: Duration,
    ) {
        if !self.begin_shutdown() {
            return;
        }

        retry_scheduler.begin_shutdown();

        self.wait_for_drain(queue, grace).await;

        retry_scheduler.drain_pending().await;

        Self::drain_queue(queue, spillover, metrics, on_event_loss).await;

        self.stop_senders().await;
        self.stop_replay().await;

        if let Some(store) = spillover {
            store.stop(SPILLOVER_STOP_GRACE).await;
        }

        self.deregister_shutdown_hook().await;
    }
}

impl Default for LifecycleSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
