//! SPEC_FULL.md §8 scenario 1: happy path, single event.

mod common;

use common::{event, DynamicTransport};
use eventlogger::{AsyncEventLogger, EventLoggerConfig, StaticTokenProvider};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn happy_path_single_event() {
    let transport = Arc::new(DynamicTransport::new(201, br#"{"execution_ids":["e1"]}"#.to_vec()));
    let config = EventLoggerConfig::builder().register_shutdown_hook(false).build().unwrap();
    let logger = AsyncEventLogger::new(
        "https://ingest.example.com",
        config,
        transport.clone(),
        Arc::new(StaticTokenProvider::new("tok").unwrap()),
    )
    .await
    .unwrap();

    assert!(logger.log(event("c1")));
    assert!(logger.flush(Duration::from_secs(1)).await);

    let snapshot = logger.metrics();
    assert_eq!(snapshot.sent, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.spilled, 0);
    assert!(!logger.circuit_open());
    assert_eq!(transport.calls_to("/v1/events"), 1, "single event uses the non-batch endpoint");
}
