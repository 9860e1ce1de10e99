//! Metrics snapshot (§3, §6): monotonic counters plus gauges.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub spilled: u64,
    pub replayed: u64,
    pub queue_depth: u64,
    pub circuit_open: bool,
}

/// Lock-free counters shared across sender/retry/spillover/replay workers.
#[derive(Default)]
pub struct Metrics {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    spilled: AtomicU64,
    replayed: AtomicU64,
    circuit_open: AtomicBool,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self, n: u64) {
        self.queued.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_failed(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_spilled(&self, n: u64) {
        self.spilled.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_replayed(&self, n: u64) {
        self.replayed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_circuit_open(&self, open: bool) {
        self.circuit_open.store(open, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_depth: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            spilled: self.spilled.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            queue_depth,
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
        }
    }
}
