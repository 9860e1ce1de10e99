//! Append-only JSONL spillover store (§4.H).
//!
//! A single writer task drains an in-memory channel and appends one line per
//! event. Both the writer and the replay scheduler's rotation take the same
//! `tokio::sync::Mutex` — the "spillover lock" — so a rotate-and-rewrite never
//! races a concurrent append.

use crate::error::EventLoggerError;
use crate::event::QueuedEvent;
use crate::metrics::Metrics;
use crate::retry_scheduler::LossCallback;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct SpilloverStore {
    active_path: PathBuf,
    replay_path: PathBuf,
    max_events: u64,
    max_bytes: u64,
    event_count: AtomicU64,
    byte_count: AtomicU64,
    lock: Arc<Mutex<()>>,
    queue_tx: std::sync::Mutex<Option<mpsc::Sender<QueuedEvent>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SpilloverStore {
    pub async fn new(
        dir: impl AsRef<Path>,
        max_events: usize,
        max_bytes: u64,
        metrics: Arc<Metrics>,
        on_event_loss: LossCallback,
    ) -> Result<Arc<Self>, EventLoggerError> {
        tokio::fs::create_dir_all(&dir).await?;
        let active_path = dir.as_ref().join("spillover.jsonl");
        let replay_path = dir.as_ref().join("spillover.replay.jsonl");
        let (events, bytes) = Self::scan(&active_path).await?;

        let (queue_tx, queue_rx) = mpsc::channel(1024);
        let store = Arc::new(Self {
            active_path,
            replay_path,
            max_events: max_events as u64,
            max_bytes,
            event_count: AtomicU64::new(events),
            byte_count: AtomicU64::new(bytes),
            lock: Arc::new(Mutex::new(())),
            queue_tx: std::sync::Mutex::new(Some(queue_tx)),
            writer_handle: Mutex::new(None),
        });
        let handle = Arc::clone(&store).spawn_writer(queue_rx, metrics, on_event_loss);
        *store.writer_handle.lock().await = Some(handle);
        Ok(store)
    }

    async fn scan(path: &Path) -> Result<(u64, u64), EventLoggerError> {
        match tokio::fs::read(path).await {
            Ok(content) => {
                let events = content.iter().filter(|b| **b == b'\n').count() as u64;
                Ok((events, content.len() as u64))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((0, 0)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn replay_path(&self) -> &Path {
        &self.replay_path
    }

    /// Shared with the replay scheduler so rotation and writes never overlap.
    pub fn exclusion_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock)
    }

    /// Non-blocking offer onto the writer's in-memory queue. Bound
    /// enforcement against `max_events`/`max_bytes` happens in the writer,
    /// where the true serialized size is known.
    pub fn offer(&self, queued: QueuedEvent) -> Result<(), EventLoggerError> {
        let guard = self.queue_tx.lock().expect("spillover queue_tx lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx
                .try_send(queued)
                .map_err(|_| EventLoggerError::SpilloverExhausted("spillover_queue_full")),
            None => Err(EventLoggerError::SpilloverExhausted("spillover_queue_full")),
        }
    }

    fn spawn_writer(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<QueuedEvent>,
        metrics: Arc<Metrics>,
        on_event_loss: LossCallback,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                self.write_one(queued, &metrics, &on_event_loss).await;
            }
        })
    }

    /// Stop accepting new offers and wait up to `grace` for the writer task
    /// to flush everything already buffered to disk (§4.J step 6). Dropping
    /// the sender half closes the channel, so the writer's `rx.recv()` loop
    /// finishes once it has drained whatever was already queued.
    pub async fn stop(&self, grace: Duration) {
        *self.queue_tx.lock().expect("spillover queue_tx lock poisoned") = None;
        if let Some(handle) = self.writer_handle.lock().await.take() {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("spillover writer did not finish flushing within the grace period");
            }
        }
    }

    async fn write_one(&self, queued: QueuedEvent, metrics: &Metrics, on_event_loss: &LossCallback) {
        let mut line = match serde_json::to_vec(&queued.event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event for spillover");
                metrics.record_failed(1);
                return;
            }
        };
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let new_events = self.event_count.load(Ordering::Relaxed) + 1;
        let new_bytes = self.byte_count.load(Ordering::Relaxed) + line.len() as u64;

        if new_events > self.max_events {
            tracing::warn!(max = self.max_events, "spillover max_spillover_events exceeded");
            metrics.record_failed(1);
            on_event_loss(queued.event, "spillover_max_events");
            return;
        }
        if new_bytes > self.max_bytes {
            tracing::warn!(max = self.max_bytes, "spillover max_spillover_bytes exceeded");
            metrics.record_failed(1);
            on_event_loss(queued.event, "spillover_max_size");
            return;
        }

        match self.append(&line).await {
            Ok(()) => {
                self.event_count.store(new_events, Ordering::Relaxed);
                self.byte_count.store(new_bytes, Ordering::Relaxed);
                metrics.record_spilled(1);
            }
            Err(e) => {
                tracing::error!(error = %e, "spillover append failed");
                metrics.record_failed(1);
            }
        }
    }

    async fn append(&self, line: &[u8]) -> Result<(), EventLoggerError> {
        let mut file =
            OpenOptions::new().create(true).append(true).open(&self.active_path).await?;
        file.write_all(line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reset the in-memory counters to reflect an empty active file, used
    /// after the replay scheduler rotates it away (§4.I).
    pub(crate) fn reset_counters(&self) {
        self.event_count.store(0, Ordering::Relaxed);
        self.byte_count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_counts(&self, events: u64, bytes: u64) {
        self.event_count.fetch_add(events, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::collections::HashMap;
    use std::time::Duration;

    fn queued() -> QueuedEvent {
        QueuedEvent::new(Event::new(HashMap::new()))
    }

    fn noop_loss() -> LossCallback {
        Arc::new(|_event, _reason| {})
    }

    fn losses_recorder() -> (LossCallback, Arc<std::sync::Mutex<Vec<&'static str>>>) {
        let losses = Arc::new(std::sync::Mutex::new(Vec::new()));
        let clone = losses.clone();
        (Arc::new(move |_event, reason| clone.lock().unwrap().push(reason)), losses)
    }

    #[tokio::test]
    async fn offered_events_are_appended_and_counted() {
        let dir = tempdir();
        let store =
            SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();

        store.offer(queued()).unwrap();
        store.offer(queued()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.event_count(), 2);

        let content = tokio::fs::read_to_string(store.active_path()).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn exceeding_max_events_drops_the_write_and_reports_loss() {
        let dir = tempdir();
        let (on_event_loss, losses) = losses_recorder();
        let store =
            SpilloverStore::new(&dir, 1, 1_000_000, Arc::new(Metrics::new()), on_event_loss).await.unwrap();

        store.offer(queued()).unwrap();
        store.offer(queued()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.event_count(), 1, "second write exceeds max_spillover_events");
        assert_eq!(losses.lock().unwrap().as_slice(), ["spillover_max_events"]);
    }

    #[tokio::test]
    async fn exceeding_max_bytes_drops_the_write_and_reports_loss() {
        let dir = tempdir();
        let (on_event_loss, losses) = losses_recorder();
        let store = SpilloverStore::new(&dir, 100, 1, Arc::new(Metrics::new()), on_event_loss).await.unwrap();

        store.offer(queued()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.event_count(), 0, "single-byte budget cannot hold even one record");
        assert_eq!(losses.lock().unwrap().as_slice(), ["spillover_max_size"]);
    }

    #[tokio::test]
    async fn restart_rescans_existing_file_into_counters() {
        let dir = tempdir();
        {
            let store = SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss())
                .await
                .unwrap();
            store.offer(queued()).unwrap();
            store.offer(queued()).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let reopened =
            SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();
        assert_eq!(reopened.event_count(), 2);
        assert!(reopened.byte_count() > 0);
    }

    #[tokio::test]
    async fn stop_flushes_buffered_events_then_rejects_further_offers() {
        let dir = tempdir();
        let store =
            SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();
        store.offer(queued()).unwrap();

        store.stop(Duration::from_secs(1)).await;

        let content = tokio::fs::read_to_string(store.active_path()).await.unwrap();
        assert_eq!(content.lines().count(), 1, "buffered event flushed before writer exits");
        assert!(store.offer(queued()).is_err(), "offers after stop() are rejected");
    }

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("eventlogger-spillover-test-{}-{}", std::process::id(), n))
    }
}
