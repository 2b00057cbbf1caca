mod common;

use std::time::Duration;

use url::Url;
use webhook_courier::{
    EventType, InMemoryRegistry, Registry, RegistryError, Subscription, SubscriptionId,
    SubscriptionStatus,
};

use common::subscription;

#[tokio::test]
async fn create_rejects_unsupported_scheme() {
    let registry = InMemoryRegistry::new();

    let url = Url::parse("ftp://example.com/hook").unwrap();
    let sub = Subscription::new("ftp hook", url).with_events([EventType::BookingCreated]);
    let id = sub.id;

    let err = registry.create(sub).await.unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    // Nothing was persisted.
    assert!(matches!(
        registry.get(id).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn malformed_url_cannot_be_expressed() {
    // "not-a-url" is rejected by the URL type itself, before a
    // subscription can even be built.
    assert!(Url::parse("not-a-url").is_err());
}

#[tokio::test]
async fn create_rejects_empty_event_set() {
    let registry = InMemoryRegistry::new();

    let url = Url::parse("https://example.com/hook").unwrap();
    let sub = Subscription::new("no events", url);

    let err = registry.create(sub).await.unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
}

#[tokio::test]
async fn create_rejects_zero_timeout() {
    let registry = InMemoryRegistry::new();

    let sub = subscription([EventType::BookingCreated]).with_timeout(Duration::ZERO);
    let err = registry.create(sub).await.unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
}

#[tokio::test]
async fn update_and_delete_unknown_id() {
    let registry = InMemoryRegistry::new();
    let ghost = SubscriptionId::generate();

    let err = registry
        .update(ghost, subscription([EventType::BookingCreated]))
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::NotFound(ghost));

    let err = registry.delete(ghost).await.unwrap_err();
    assert_eq!(err, RegistryError::NotFound(ghost));

    let err = registry
        .set_status(ghost, SubscriptionStatus::Inactive)
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::NotFound(ghost));
}

#[tokio::test]
async fn update_keeps_stored_id() {
    let registry = InMemoryRegistry::new();

    let id = registry
        .create(subscription([EventType::BookingCreated]))
        .await
        .unwrap();

    // The replacement carries its own fresh id; the stored one wins.
    let replacement = subscription([EventType::PaymentFailed]).with_header("X-Env", "prod");
    registry.update(id, replacement).await.unwrap();

    let stored = registry.get(id).await.unwrap();
    assert_eq!(stored.id, id);
    assert!(stored.events.contains(&EventType::PaymentFailed));
    assert_eq!(stored.headers.get("X-Env").map(String::as_str), Some("prod"));
}

#[tokio::test]
async fn inactive_subscriptions_are_never_matched() {
    let registry = InMemoryRegistry::new();

    let active = registry
        .create(subscription([EventType::BookingCreated]))
        .await
        .unwrap();
    let disabled = registry
        .create(
            subscription([EventType::BookingCreated])
                .with_status(SubscriptionStatus::Inactive),
        )
        .await
        .unwrap();

    let matched = registry
        .find_active_for_event(EventType::BookingCreated)
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, active);

    // Flipping status is enough to drop out of matching.
    registry
        .set_status(active, SubscriptionStatus::Inactive)
        .await
        .unwrap();
    registry
        .set_status(disabled, SubscriptionStatus::Active)
        .await
        .unwrap();

    let matched = registry
        .find_active_for_event(EventType::BookingCreated)
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, disabled);
}

#[tokio::test]
async fn matching_respects_event_membership() {
    let registry = InMemoryRegistry::new();

    registry
        .create(subscription([EventType::BookingCreated, EventType::BookingCancelled]))
        .await
        .unwrap();

    assert_eq!(
        registry
            .find_active_for_event(EventType::BookingCancelled)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(registry
        .find_active_for_event(EventType::PaymentFailed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn delete_removes_future_matching() {
    let registry = InMemoryRegistry::new();

    let id = registry
        .create(subscription([EventType::BookingCreated]))
        .await
        .unwrap();
    registry.delete(id).await.unwrap();

    assert!(registry
        .find_active_for_event(EventType::BookingCreated)
        .await
        .unwrap()
        .is_empty());
}
