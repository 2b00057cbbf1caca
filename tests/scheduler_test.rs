mod common;

use std::time::Duration;

use serde_json::json;
use webhook_courier::{
    AttemptStatus, DeliveryLog, Event, EventType, Registry, RetryScheduler, SchedulerConfig,
    TransportError,
};

use common::{harness, subscription, MockTransport};

#[tokio::test]
async fn scheduler_drives_due_retries_to_completion() {
    let transport = MockTransport::sequence(
        vec![Err(TransportError::Network("connection refused".to_string())), Ok(200)],
        Ok(200),
    );
    let h = harness(transport);

    let sub = subscription([EventType::BookingCreated]).with_retry_policy(2, Duration::ZERO);
    h.registry.create(sub.clone()).await.unwrap();

    let first = h
        .service
        .deliver(&sub, &Event::new(EventType::BookingCreated, json!({"booking_id": 8})))
        .await
        .unwrap();
    assert_eq!(first.status, AttemptStatus::Failed);

    let mut scheduler = RetryScheduler::start(
        h.service.clone(),
        SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            cleanup_interval: None,
            retention: Duration::from_secs(3600),
        },
    );

    // The timer, not any caller, turns the failed row into a success.
    let mut recovered = false;
    for _ in 0..200 {
        let chain = h.log.find_by_delivery(first.delivery_id).await.unwrap();
        if chain.len() == 2 && chain[1].status == AttemptStatus::Success {
            recovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    scheduler.shutdown().await;
    assert!(recovered, "scheduler never processed the due retry");
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn scheduler_runs_retention_cleanup() {
    let h = harness(MockTransport::always_status(200));
    let sub = subscription([EventType::BookingCreated]);
    h.registry.create(sub.clone()).await.unwrap();

    h.service
        .deliver(&sub, &Event::new(EventType::BookingCreated, json!({})))
        .await
        .unwrap();
    assert_eq!(h.log.all().await.len(), 1);

    let mut scheduler = RetryScheduler::start(
        h.service.clone(),
        SchedulerConfig {
            poll_interval: Duration::from_millis(500),
            cleanup_interval: Some(Duration::from_millis(20)),
            retention: Duration::ZERO,
        },
    );

    let mut purged = false;
    for _ in 0..200 {
        if h.log.all().await.is_empty() {
            purged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    scheduler.shutdown().await;
    assert!(purged, "scheduler never purged expired rows");
}

#[tokio::test]
async fn shutdown_is_idempotent_and_stops_polling() {
    let h = harness(MockTransport::always_status(200));

    let mut scheduler = RetryScheduler::start(
        h.service.clone(),
        SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            cleanup_interval: None,
            retention: Duration::from_secs(3600),
        },
    );

    assert!(scheduler.is_running());
    scheduler.shutdown().await;
    assert!(!scheduler.is_running());
    // A second shutdown is a no-op.
    scheduler.shutdown().await;
}
