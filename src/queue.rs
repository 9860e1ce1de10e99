//! Bounded FIFO queue with a batching drainer (§4.D).
//!
//! `try_offer` is non-blocking; `drain_up_to` blocks up to `max_wait` for the
//! first element, then greedily takes up to `n` more without blocking. The
//! queue does not guarantee order across retries — a retried event is
//! re-enqueued at the tail when its delay elapses.

use crate::event::QueuedEvent;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub struct EventQueue {
    sender: mpsc::Sender<QueuedEvent>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueuedEvent>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver: tokio::sync::Mutex::new(receiver), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking enqueue. Returns `false` if the queue is at capacity.
    pub fn try_offer(&self, event: QueuedEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// A cheap, separately-clonable handle used by retry/replay paths to
    /// re-enqueue without holding the main queue lock.
    pub fn sender_handle(&self) -> mpsc::Sender<QueuedEvent> {
        self.sender.clone()
    }

    /// Current number of events resident in the queue.
    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Take a single resident event without waiting, or `None` if the queue
    /// is empty right now. Used by the lifecycle supervisor's shutdown drain
    /// (§4.J step 5), which needs to pull events one at a time without
    /// racing a sender's own `drain_up_to`.
    pub fn try_drain_one(&self) -> Option<QueuedEvent> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Block up to `max_wait` for the first element, then greedily take up
    /// to `n` more without blocking.
    pub async fn drain_up_to(&self, n: usize, max_wait: std::time::Duration) -> Vec<QueuedEvent> {
        if n == 0 {
            return Vec::new();
        }
        let mut receiver = self.receiver.lock().await;
        let mut batch = Vec::with_capacity(n);

        match timeout(max_wait, receiver.recv()).await {
            Ok(Some(first)) => batch.push(first),
            Ok(None) => return batch,  // channel closed
            Err(_) => return batch,    // timed out with nothing to drain
        }

        while batch.len() < n {
            match receiver.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::collections::HashMap;
    use std::time::Duration;

    fn event() -> QueuedEvent {
        QueuedEvent::new(Event::new(HashMap::new()))
    }

    #[tokio::test]
    async fn try_offer_rejects_when_full() {
        let queue = EventQueue::new(2);
        assert!(queue.try_offer(event()));
        assert!(queue.try_offer(event()));
        assert!(!queue.try_offer(event()), "third offer should be rejected at capacity 2");
    }

    #[tokio::test]
    async fn drain_up_to_returns_available_without_blocking() {
        let queue = EventQueue::new(10);
        queue.try_offer(event());
        queue.try_offer(event());
        queue.try_offer(event());

        let batch = queue.drain_up_to(2, Duration::from_millis(50)).await;
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn drain_up_to_times_out_when_empty() {
        let queue = EventQueue::new(10);
        let start = std::time::Instant::now();
        let batch = queue.drain_up_to(5, Duration::from_millis(20)).await;
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = EventQueue::new(10);
        for i in 0..5 {
            let mut fields = HashMap::new();
            fields.insert("correlation_id".to_string(), serde_json::json!(i.to_string()));
            queue.try_offer(QueuedEvent::new(Event::new(fields)));
        }

        let batch = queue.drain_up_to(5, Duration::from_millis(50)).await;
        let ids: Vec<_> =
            batch.iter().map(|q| q.event.correlation_id().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn try_drain_one_takes_a_single_event_without_blocking() {
        let queue = EventQueue::new(10);
        assert!(queue.try_drain_one().is_none());
        queue.try_offer(event());
        queue.try_offer(event());
        assert!(queue.try_drain_one().is_some());
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn depth_reflects_resident_events() {
        let queue = EventQueue::new(10);
        assert_eq!(queue.depth(), 0);
        queue.try_offer(event());
        queue.try_offer(event());
        assert_eq!(queue.depth(), 2);
        queue.drain_up_to(1, Duration::from_millis(10)).await;
        assert_eq!(queue.depth(), 1);
    }
}
