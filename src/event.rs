//! The event types that flow through the queue, sender, and spillover store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// An opaque, application-supplied record.
///
/// The core only reads two well-known fields for logging (`correlation_id`,
/// `process_name`); every other field is pass-through and is never
/// interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    fields: HashMap<String, Value>,
}

impl Event {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.fields.get("correlation_id").and_then(Value::as_str)
    }

    pub fn process_name(&self) -> Option<&str> {
        self.fields.get("process_name").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }
}

/// An event that has been accepted onto the queue.
///
/// `attempts` starts at 0 and is incremented only by the retry scheduler,
/// which produces a new `QueuedEvent` rather than mutating this one in
/// place.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: Event,
    pub attempts: u32,
    pub first_enqueue_time: Instant,
}

impl QueuedEvent {
    pub fn new(event: Event) -> Self {
        Self { event, attempts: 0, first_enqueue_time: Instant::now() }
    }

    /// Produce the next-attempt version of this event for re-enqueue.
    pub fn next_attempt(&self) -> Self {
        Self {
            event: self.event.clone(),
            attempts: self.attempts + 1,
            first_enqueue_time: self.first_enqueue_time,
        }
    }
}

/// An ordered sequence of queued events drained together by the sender loop.
/// Ephemeral: constructed and released within a single loop iteration.
pub type Batch = Vec<QueuedEvent>;

/// The result of dispatching a batch to the API client.
#[derive(Debug)]
pub enum BatchResult {
    AllSuccess,
    PartialFailure { failed_indices: Vec<(usize, String)> },
    TotalFailure { error: String },
}
