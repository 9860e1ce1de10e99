//! SPEC_FULL.md §8 scenario 4: queue full with spillover disabled.

mod common;

use common::{event, DynamicTransport};
use eventlogger::{AsyncEventLogger, EventLoggerConfig, StaticTokenProvider};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn queue_full_reports_loss_and_drops_the_newest_event() {
    let transport = Arc::new(DynamicTransport::new(201, br#"{"execution_ids":["e1"]}"#.to_vec()));
    let config = EventLoggerConfig::builder()
        .queue_capacity(2)
        .sender_threads(0)
        .register_shutdown_hook(false)
        .build()
        .unwrap();

    let losses = Arc::new(Mutex::new(Vec::new()));
    let losses_clone = losses.clone();
    let logger = AsyncEventLogger::with_event_loss_handler(
        "https://ingest.example.com",
        config,
        transport,
        Arc::new(StaticTokenProvider::new("tok").unwrap()),
        Arc::new(move |_event, reason| losses_clone.lock().unwrap().push(reason)),
    )
    .await
    .unwrap();

    assert!(logger.log(event("c1")));
    assert!(logger.log(event("c2")));
    assert!(!logger.log(event("c3")));

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(losses.lock().unwrap().as_slice(), ["queue_full"]);
    let snapshot = logger.metrics();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.queue_depth, 2);
}
