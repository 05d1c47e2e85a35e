//! End-to-end tests for the routing-and-batching core.
//!
//! These drive a started `LogService` with in-memory sinks and check what
//! each destination's storage actually receives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use loggate::config::{MatchCondition, RoutingRule};
use loggate::test_utils::{FailingSink, MemorySink};
use loggate::worker::WorkerSettings;
use loggate::{IngestOutcome, LogRecord, LogService, LogSink, Router, ServiceSettings};
use tokio_util::sync::CancellationToken;

fn settings(buffer_size: usize, batch_size: usize, batch_timeout: Duration) -> ServiceSettings {
    ServiceSettings {
        buffer_size,
        worker: WorkerSettings {
            batch_size,
            batch_timeout,
            shutdown_grace: Duration::from_secs(2),
        },
    }
}

fn dest<S: LogSink + 'static>(name: &str, sink: &Arc<S>) -> (String, Arc<dyn LogSink>) {
    (name.to_string(), sink.clone())
}

fn rec(service: &str, level: &str, message: &str) -> LogRecord {
    LogRecord::new(level, "app", service, message)
}

#[tokio::test(start_paused = true)]
async fn size_trigger_then_shutdown_flushes_remainder() {
    let d1 = MemorySink::new();
    let router = Router::new(&[], &["d1".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("d1", &d1)]),
        router,
        settings(2, 2, Duration::from_secs(10)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    service.ingest(rec("x", "info", "A"));
    service.ingest(rec("x", "info", "B"));
    d1.wait_for_batches(1).await;
    assert_eq!(d1.batch_messages(), vec![vec!["A", "B"]]);

    // Buffer is empty again, so C is admitted and waits for a trigger.
    assert_eq!(
        service.ingest(rec("x", "info", "C")),
        IngestOutcome::Routed { admitted: 1, dropped: 0, unknown: 0 }
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(d1.batch_count(), 1);

    service.shutdown().await;
    assert_eq!(d1.batch_messages(), vec![vec!["A", "B"], vec!["C"]]);
}

#[tokio::test(start_paused = true)]
async fn timeout_trigger_flushes_partial_batch() {
    let d1 = MemorySink::new();
    let router = Router::new(&[], &["d1".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("d1", &d1)]),
        router,
        settings(10, 5, Duration::from_secs(10)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    service.ingest(rec("x", "info", "only"));
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(d1.batch_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(d1.batch_messages(), vec![vec!["only"]]);

    service.shutdown().await;
    assert_eq!(d1.batch_count(), 1);
}

#[tokio::test]
async fn rule_routes_pay_errors_to_alerts_only() {
    let alerts = MemorySink::new();
    let archive = MemorySink::new();
    let rules = [RoutingRule {
        match_condition: Some(MatchCondition {
            service: "pay".to_string(),
            level: "error".to_string(),
        }),
        destinations: vec!["alerts".to_string()],
    }];
    let router = Router::new(&rules, &["archive".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("alerts", &alerts), dest("archive", &archive)]),
        router,
        settings(16, 16, Duration::from_secs(10)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    service.ingest(rec("pay", "ERROR", "declined"));
    service.ingest(rec("pay", "info", "paid"));
    let stats = service.shutdown().await;

    assert_eq!(alerts.messages(), vec!["declined"]);
    assert_eq!(archive.messages(), vec!["paid"]);
    assert_eq!(stats.destination("alerts").records_flushed, 1);
    assert_eq!(stats.destination("archive").records_flushed, 1);
}

#[tokio::test]
async fn fan_out_shares_one_record_allocation() {
    let a = MemorySink::new();
    let b = MemorySink::new();
    let router = Router::new(&[], &["a".to_string(), "b".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("a", &a), dest("b", &b)]),
        router,
        settings(4, 4, Duration::from_secs(10)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    assert_eq!(
        service.ingest(rec("x", "info", "shared")),
        IngestOutcome::Routed { admitted: 2, dropped: 0, unknown: 0 }
    );
    service.shutdown().await;

    let from_a = &a.batches()[0][0];
    let from_b = &b.batches()[0][0];
    assert!(Arc::ptr_eq(from_a, from_b));
}

#[tokio::test(start_paused = true)]
async fn per_destination_order_is_preserved_across_batches() {
    let d1 = MemorySink::new();
    let router = Router::new(&[], &["d1".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("d1", &d1)]),
        router,
        settings(100, 7, Duration::from_millis(250)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    let expected: Vec<String> = (0..50).map(|i| format!("m{i:02}")).collect();
    for (i, message) in expected.iter().enumerate() {
        service.ingest(rec("x", "info", message));
        if i % 10 == 9 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    service.shutdown().await;

    assert_eq!(d1.messages(), expected);
    assert!(d1.batches().iter().all(|b| !b.is_empty() && b.len() <= 7));
}

#[tokio::test]
async fn failing_destination_does_not_affect_siblings() {
    let broken = FailingSink::new(usize::MAX);
    let healthy = MemorySink::new();
    let router = Router::new(&[], &["broken".to_string(), "healthy".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("broken", &broken), dest("healthy", &healthy)]),
        router,
        settings(16, 2, Duration::from_secs(10)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    for i in 0..4 {
        service.ingest(rec("x", "info", &format!("m{i}")));
    }
    let stats = service.shutdown().await;

    assert_eq!(healthy.messages(), vec!["m0", "m1", "m2", "m3"]);
    assert!(broken.inner().messages().is_empty());
    assert_eq!(stats.destination("broken").records_lost, 4);
    assert_eq!(stats.destination("healthy").records_lost, 0);
}

#[tokio::test]
async fn records_admitted_before_shutdown_are_flushed() {
    let d1 = MemorySink::new();
    let router = Router::new(&[], &["d1".to_string()]);
    let mut service = LogService::new(
        HashMap::from([dest("d1", &d1)]),
        router,
        settings(100, 1000, Duration::from_secs(60)),
        CancellationToken::new(),
    );
    service.start().unwrap();

    for i in 0..25 {
        service.ingest(rec("x", "info", &format!("m{i}")));
    }
    let stats = service.shutdown().await;

    assert_eq!(d1.messages().len(), 25);
    assert_eq!(stats.destination("d1").enqueued, 25);
    assert_eq!(stats.destination("d1").records_flushed, 25);
    assert_eq!(d1.close_count(), 1);
}
