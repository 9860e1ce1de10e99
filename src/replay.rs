//! Replay scheduler (§4.I): on a fixed interval, rotate the spillover file,
//! replay it one event at a time, and rewrite whatever failed back onto the
//! active file.
//!
//! Rotation and rewrite take the spillover exclusion lock; the replay network
//! calls themselves happen outside it, so a slow downstream endpoint never
//! blocks the writer task from appending new events.

use crate::api_client::ApiClient;
use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitState};
use crate::metrics::Metrics;
use crate::spillover::SpilloverStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub struct ReplayScheduler {
    store: Arc<SpilloverStore>,
    api_client: Arc<ApiClient>,
    breaker: Arc<CircuitBreakerPolicy>,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl ReplayScheduler {
    pub fn new(
        store: Arc<SpilloverStore>,
        api_client: Arc<ApiClient>,
        breaker: Arc<CircuitBreakerPolicy>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self { store, api_client, breaker, metrics, interval }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    /// One rotate+replay+rewrite cycle. Exposed directly so tests can drive
    /// it without waiting on a real interval.
    pub async fn tick(&self) {
        if self.breaker.state() == CircuitState::Open {
            tracing::debug!("replay tick skipped: circuit open");
            return;
        }

        let Some(lines) = self.rotate().await else {
            return; // nothing to replay
        };
        if lines.is_empty() {
            return;
        }

        let mut remaining = Vec::new();
        let mut replayed = 0u64;
        let mut lines_iter = lines.iter();
        for line in lines_iter.by_ref() {
            match serde_json::from_slice::<crate::event::Event>(line) {
                Ok(event) => match self.api_client.create_event(&event).await {
                    Ok(_) => replayed += 1,
                    Err(e) => {
                        // A single probe per line: stop on the first send
                        // failure rather than hammering every remaining
                        // event against an endpoint that just rejected one.
                        tracing::warn!(error = %e, "replay send failed, stopping this cycle");
                        remaining.push(line.clone());
                        break;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "dropping unparsable spillover line");
                }
            }
        }
        remaining.extend(lines_iter.cloned());

        if replayed > 0 {
            self.metrics.record_replayed(replayed);
        }
        self.rewrite_remaining(&remaining).await;
    }

    /// Rename the active spillover file out of the way so the writer task
    /// keeps appending to a fresh one while this cycle replays the old
    /// contents. Returns the rotated-out lines, or `None` if there was
    /// nothing to rotate.
    async fn rotate(&self) -> Option<Vec<Vec<u8>>> {
        let _guard = self.store.exclusion_lock().lock_owned().await;

        let content = match tokio::fs::read(self.store.active_path()).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::error!(error = %e, "replay rotate: read failed");
                return None;
            }
        };

        match tokio::fs::rename(self.store.active_path(), self.store.replay_path()).await {
            Ok(()) => {}
            Err(_) => {
                // Cross-device or other rename failure: fall back to copy + truncate.
                if let Err(e) = tokio::fs::copy(self.store.active_path(), self.store.replay_path()).await {
                    tracing::error!(error = %e, "replay rotate: copy fallback failed");
                    return None;
                }
                if let Err(e) = tokio::fs::remove_file(self.store.active_path()).await {
                    tracing::error!(error = %e, "replay rotate: truncate after copy failed");
                }
            }
        }
        self.store.reset_counters();

        Some(content.split(|b| *b == b'\n').filter(|line| !line.is_empty()).map(|l| l.to_vec()).collect())
    }

    /// Merge unsent lines back onto whatever the writer has appended to the
    /// active file since rotation, via a temp file + atomic rename.
    async fn rewrite_remaining(&self, remaining: &[Vec<u8>]) {
        if remaining.is_empty() {
            let _ = tokio::fs::remove_file(self.store.replay_path()).await;
            return;
        }

        let guard = self.store.exclusion_lock().lock_owned().await;

        let current = tokio::fs::read(self.store.active_path()).await.unwrap_or_default();
        let tmp_path = self.store.active_path().with_extension("rewrite.tmp");

        let mut merged = Vec::with_capacity(current.len() + remaining.iter().map(|l| l.len() + 1).sum::<usize>());
        for line in remaining {
            merged.extend_from_slice(line);
            merged.push(b'\n');
        }
        merged.extend_from_slice(&current);

        if let Err(e) = self.write_temp_then_rename(&tmp_path, &merged).await {
            tracing::error!(error = %e, "replay rewrite failed, unsent events may be lost");
            drop(guard);
            return;
        }

        self.store.add_counts(remaining.len() as u64, merged.len() as u64 - current.len() as u64);
        let _ = tokio::fs::remove_file(self.store.replay_path()).await;
    }

    async fn write_temp_then_rename(
        &self,
        tmp_path: &std::path::Path,
        content: &[u8],
    ) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        file.write_all(content).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(tmp_path, self.store.active_path()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::token_provider::StaticTokenProvider;
    use crate::transport::test_support::ScriptedTransport;
    use crate::transport::TransportResponse;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn tempdir() -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("eventlogger-replay-test-{}-{}", std::process::id(), n))
    }

    fn client(transport: ScriptedTransport) -> Arc<ApiClient> {
        Arc::new(ApiClient::new(
            Arc::new(transport),
            Arc::new(StaticTokenProvider::new("tok").unwrap()),
            "https://ingest.example.com",
            Duration::from_secs(5),
        ))
    }

    fn noop_loss() -> crate::retry_scheduler::LossCallback {
        Arc::new(|_event, _reason| {})
    }

    fn event_line(correlation_id: &str) -> crate::event::QueuedEvent {
        let mut fields = HashMap::new();
        fields.insert("correlation_id".to_string(), serde_json::json!(correlation_id));
        crate::event::QueuedEvent::new(Event::new(fields))
    }

    #[tokio::test]
    async fn successful_replay_clears_the_spillover_file() {
        let dir = tempdir();
        let store = SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();
        store.offer(crate::event::QueuedEvent::new(Event::new(HashMap::new()))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let transport = ScriptedTransport::always(TransportResponse {
            status_code: 201,
            body: br#"{"execution_ids":["e1"]}"#.to_vec(),
        });
        let breaker = Arc::new(CircuitBreakerPolicy::new(5, Duration::from_secs(30)));
        let metrics = Arc::new(Metrics::new());
        let scheduler =
            ReplayScheduler::new(store.clone(), client(transport), breaker, metrics.clone(), Duration::from_secs(60));

        scheduler.tick().await;

        assert_eq!(metrics.snapshot(0).replayed, 1);
        assert!(!store.replay_path().exists());
        let remaining = tokio::fs::read_to_string(store.active_path()).await.unwrap_or_default();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn failed_replay_rewrites_the_event_for_next_cycle() {
        let dir = tempdir();
        let store = SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();
        store.offer(crate::event::QueuedEvent::new(Event::new(HashMap::new()))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let transport = ScriptedTransport::always(TransportResponse { status_code: 500, body: b"{}".to_vec() });
        let breaker = Arc::new(CircuitBreakerPolicy::new(1000, Duration::from_secs(30)));
        let metrics = Arc::new(Metrics::new());
        let scheduler =
            ReplayScheduler::new(store.clone(), client(transport), breaker, metrics.clone(), Duration::from_secs(60));

        scheduler.tick().await;

        assert_eq!(metrics.snapshot(0).replayed, 0);
        let remaining = tokio::fs::read_to_string(store.active_path()).await.unwrap();
        assert_eq!(remaining.lines().count(), 1);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn a_send_failure_stops_the_cycle_instead_of_probing_every_line() {
        let dir = tempdir();
        let store = SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();
        store.offer(event_line("c1")).unwrap();
        store.offer(event_line("c2")).unwrap();
        store.offer(event_line("c3")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let transport = Arc::new(ScriptedTransport::always(TransportResponse {
            status_code: 500,
            body: b"{}".to_vec(),
        }));
        let api_client = Arc::new(ApiClient::new(
            transport.clone(),
            Arc::new(StaticTokenProvider::new("tok").unwrap()),
            "https://ingest.example.com",
            Duration::from_secs(5),
        ));
        let breaker = Arc::new(CircuitBreakerPolicy::new(1000, Duration::from_secs(30)));
        let metrics = Arc::new(Metrics::new());
        let scheduler =
            ReplayScheduler::new(store.clone(), api_client, breaker, metrics.clone(), Duration::from_secs(60));

        scheduler.tick().await;

        assert_eq!(transport.call_count(), 1, "stop after the first send failure, don't probe every line");
        assert_eq!(metrics.snapshot(0).replayed, 0);
        let remaining = tokio::fs::read_to_string(store.active_path()).await.unwrap();
        assert_eq!(remaining.lines().count(), 3, "all three lines kept: the failing one plus the untouched rest");
        assert_eq!(store.event_count(), 3);
    }

    #[tokio::test]
    async fn tick_is_skipped_while_circuit_is_open() {
        let dir = tempdir();
        let store = SpilloverStore::new(&dir, 100, 1_000_000, Arc::new(Metrics::new()), noop_loss()).await.unwrap();
        store.offer(crate::event::QueuedEvent::new(Event::new(HashMap::new()))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let transport = ScriptedTransport::always(TransportResponse {
            status_code: 201,
            body: br#"{"execution_ids":["e1"]}"#.to_vec(),
        });
        let breaker = Arc::new(CircuitBreakerPolicy::new(1, Duration::from_secs(30)));
        let _ = breaker
            .execute(|| async {
                Err::<(), _>(crate::ResilienceError::Inner(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "x",
                )))
            })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let metrics = Arc::new(Metrics::new());
        let scheduler =
            ReplayScheduler::new(store.clone(), client(transport), breaker, metrics.clone(), Duration::from_secs(60));
        scheduler.tick().await;

        assert_eq!(metrics.snapshot(0).replayed, 0);
        assert!(store.active_path().exists());
    }
}
