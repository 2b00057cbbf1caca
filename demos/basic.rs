use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use webhook_courier::{
    DeliveryConfig, DeliveryService, Dispatcher, DispatcherConfig, Event, EventType,
    InMemoryDeliveryLog, InMemoryRegistry, Registry, ReqwestTransport, RetryScheduler,
    SchedulerConfig, Subscription,
};

#[tokio::main]
async fn main() {
    let registry = Arc::new(InMemoryRegistry::new());
    let log = Arc::new(InMemoryDeliveryLog::new());
    let transport = Arc::new(ReqwestTransport::new(Some("webhook-courier-demo")));

    let service = Arc::new(DeliveryService::new(
        registry.clone(),
        log.clone(),
        transport,
        DeliveryConfig {
            secret: Some("supersecret".to_string()),
            ..DeliveryConfig::default()
        },
    ));

    let url = Url::parse("https://example.com/webhook").expect("static url");
    let subscription = Subscription::new("orders", url)
        .with_events([EventType::BookingCreated, EventType::PaymentCompleted])
        .with_retry_policy(3, Duration::from_secs(60));

    registry
        .create(subscription)
        .await
        .expect("valid subscription");

    let dispatcher = Dispatcher::new(registry, service.clone(), DispatcherConfig::default());
    let mut scheduler = RetryScheduler::start(service, SchedulerConfig::default());

    let results = dispatcher
        .dispatch(Event::new(
            EventType::BookingCreated,
            json!({"booking_id": 123, "total": "42.00"}),
        ))
        .await
        .expect("registry reachable");

    println!("initiated {} deliveries", results.len());

    scheduler.shutdown().await;
}
