mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use webhook_courier::{
    AttemptStatus, Condition, ConditionOp, DeliveryMode, DispatchOutcome, Dispatcher,
    DispatcherConfig, Event, EventType, Registry,
};

use common::{harness, subscription, MockTransport};

fn sync_dispatcher(h: &common::Harness) -> Dispatcher {
    Dispatcher::new(
        h.registry.clone(),
        h.service.clone(),
        DispatcherConfig {
            mode: DeliveryMode::Sync,
            max_in_flight: 4,
        },
    )
}

#[tokio::test]
async fn fan_out_hits_every_subscriber_exactly_once() {
    let h = harness(MockTransport::always_status(200));

    for _ in 0..3 {
        h.registry
            .create(subscription([EventType::BookingCreated]))
            .await
            .unwrap();
    }
    // A subscriber to a different event stays out of the fan-out.
    h.registry
        .create(subscription([EventType::PaymentFailed]))
        .await
        .unwrap();

    let dispatcher = sync_dispatcher(&h);
    let results = dispatcher
        .dispatch(Event::new(EventType::BookingCreated, json!({"booking_id": 42})))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(h.transport.request_count().await, 3);

    let rows = h.log.all().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|a| a.status == AttemptStatus::Success));

    // One attempt per subscription, no duplicates.
    let mut subs: Vec<_> = rows.iter().map(|a| a.subscription_id).collect();
    subs.sort_by_key(|id| id.0);
    subs.dedup();
    assert_eq!(subs.len(), 3);
}

#[tokio::test]
async fn no_matches_means_no_rows() {
    let h = harness(MockTransport::always_status(200));
    let dispatcher = sync_dispatcher(&h);

    let results = dispatcher
        .dispatch(Event::new(EventType::BookingCancelled, json!({})))
        .await
        .unwrap();

    assert!(results.is_empty());
    assert!(h.log.all().await.is_empty());
    assert_eq!(h.transport.request_count().await, 0);
}

#[tokio::test]
async fn failed_condition_skips_without_log_row() {
    let h = harness(MockTransport::always_status(200));

    h.registry
        .create(
            subscription([EventType::PaymentCompleted]).with_condition(Condition::new(
                "amount",
                ConditionOp::Gt,
                json!(100),
            )),
        )
        .await
        .unwrap();

    let dispatcher = sync_dispatcher(&h);

    // Below threshold: never selected, no trace anywhere.
    let results = dispatcher
        .dispatch(Event::new(EventType::PaymentCompleted, json!({"amount": 40})))
        .await
        .unwrap();
    assert!(results.is_empty());
    assert!(h.log.all().await.is_empty());

    // Above threshold: delivered.
    let results = dispatcher
        .dispatch(Event::new(EventType::PaymentCompleted, json!({"amount": 250})))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(h.log.all().await.len(), 1);
}

#[tokio::test]
async fn sync_mode_returns_finished_attempts() {
    let h = harness(MockTransport::always_status(204));
    h.registry
        .create(subscription([EventType::CustomerCreated]))
        .await
        .unwrap();

    let dispatcher = sync_dispatcher(&h);
    let results = dispatcher
        .dispatch(Event::new(EventType::CustomerCreated, json!({"id": 7})))
        .await
        .unwrap();

    match &results[0].outcome {
        DispatchOutcome::Completed(attempt) => {
            assert_eq!(attempt.status, AttemptStatus::Success);
            assert_eq!(attempt.http_status, Some(204));
            assert_eq!(attempt.attempt_number, 1);
        }
        other => panic!("expected completed outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn async_mode_initiates_and_returns() {
    let h = harness(MockTransport::always_status(200));
    h.registry
        .create(subscription([EventType::BookingCompleted]))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(
        h.registry.clone(),
        h.service.clone(),
        DispatcherConfig {
            mode: DeliveryMode::Async,
            max_in_flight: 2,
        },
    );

    let results = dispatcher
        .dispatch(Event::new(EventType::BookingCompleted, json!({"booking_id": 9})))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let delivery_id = match &results[0].outcome {
        DispatchOutcome::Enqueued { delivery_id } => *delivery_id,
        other => panic!("expected enqueued outcome, got {:?}", other),
    };

    // The attempt runs in the background; wait for its terminal row.
    let mut done = false;
    for _ in 0..200 {
        let rows = h.log.all().await;
        if rows
            .iter()
            .any(|a| a.delivery_id == delivery_id && a.status == AttemptStatus::Success)
        {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(done, "async delivery never completed");
}

#[tokio::test]
async fn dispatch_survives_delivery_failure() {
    let h = harness(MockTransport::always_error(
        webhook_courier::TransportError::Network("connection refused".to_string()),
    ));
    h.registry
        .create(subscription([EventType::BookingCreated]))
        .await
        .unwrap();

    let dispatcher = sync_dispatcher(&h);
    let results = dispatcher
        .dispatch(Event::new(EventType::BookingCreated, json!({"booking_id": 1})))
        .await
        .unwrap();

    // The failure is a recorded outcome, not an error.
    assert_eq!(results.len(), 1);
    match &results[0].outcome {
        DispatchOutcome::Completed(attempt) => {
            assert_eq!(attempt.status, AttemptStatus::Failed);
            assert!(attempt.next_retry_at.is_some());
        }
        other => panic!("expected completed outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn bounded_fan_out_processes_all_subscribers() {
    let h = harness(MockTransport::always_status(200));

    for _ in 0..10 {
        h.registry
            .create(subscription([EventType::PaymentRefunded]))
            .await
            .unwrap();
    }

    // More subscribers than permits: everything still gets delivered.
    let dispatcher = Arc::new(Dispatcher::new(
        h.registry.clone(),
        h.service.clone(),
        DispatcherConfig {
            mode: DeliveryMode::Async,
            max_in_flight: 2,
        },
    ));

    let results = dispatcher
        .dispatch(Event::new(EventType::PaymentRefunded, json!({"refund": true})))
        .await
        .unwrap();
    assert_eq!(results.len(), 10);

    let mut done = false;
    for _ in 0..200 {
        let rows = h.log.all().await;
        if rows.len() == 10 && rows.iter().all(|a| a.status == AttemptStatus::Success) {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(done, "not all bounded deliveries completed");
}
