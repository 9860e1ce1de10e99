//! Shared test support for the end-to-end scenario tests (SPEC_FULL.md §8).
//!
//! Integration tests only see the crate's public surface, so this is a
//! second, independent `Transport` double from the crate's own
//! `#[cfg(test)]`-only `ScriptedTransport` — it needs to be reachable from
//! outside the crate and to support flipping status code at runtime (for the
//! circuit-breaker recovery scenario).

use async_trait::async_trait;
use eventlogger::{Transport, TransportError, TransportRequest, TransportResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A `Transport` whose status code can be flipped live and which counts
/// calls per path, so tests can assert on how many times each endpoint was
/// hit without needing a real server.
pub struct DynamicTransport {
    status_code: AtomicU16,
    body: Mutex<Vec<u8>>,
    latency: Mutex<Duration>,
    calls: AtomicU64,
    calls_by_path: Mutex<HashMap<String, u64>>,
}

impl DynamicTransport {
    pub fn new(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code: AtomicU16::new(status_code),
            body: Mutex::new(body.into()),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
            calls_by_path: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub fn set_status(&self, status_code: u16) {
        self.status_code.store(status_code, Ordering::SeqCst);
    }

    pub fn set_body(&self, body: impl Into<Vec<u8>>) {
        *self.body.lock().unwrap() = body.into();
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, path_suffix: &str) -> u64 {
        self.calls_by_path
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.ends_with(path_suffix))
            .map(|(_, count)| *count)
            .sum()
    }
}

#[async_trait]
impl Transport for DynamicTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_path.lock().unwrap().entry(request.uri).or_insert(0) += 1;
        Ok(TransportResponse {
            status_code: self.status_code.load(Ordering::SeqCst),
            body: self.body.lock().unwrap().clone(),
        })
    }
}

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh, not-yet-created spillover directory path unique to this process
/// and test invocation.
pub fn unique_spillover_dir(label: &str) -> std::path::PathBuf {
    let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("eventlogger-e2e-{}-{}-{}", label, std::process::id(), n))
}

pub fn event(correlation_id: &str) -> eventlogger::Event {
    let mut fields = HashMap::new();
    fields.insert("correlation_id".to_string(), serde_json::json!(correlation_id));
    eventlogger::Event::new(fields)
}
