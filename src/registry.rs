use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::types::{EventType, Subscription, SubscriptionId, SubscriptionStatus};

/// CRUD store for webhook subscriptions.
///
/// Validation happens here, before persistence; delivery code may
/// assume stored subscriptions are well-formed (and still re-checks
/// defensively). Deleting a subscription never touches the delivery
/// log: attempt rows stay for audit.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn create(&self, subscription: Subscription) -> Result<SubscriptionId, RegistryError>;

    /// Replace a stored subscription. The stored id wins over whatever
    /// id the passed value carries.
    async fn update(
        &self,
        id: SubscriptionId,
        subscription: Subscription,
    ) -> Result<(), RegistryError>;

    async fn delete(&self, id: SubscriptionId) -> Result<(), RegistryError>;

    async fn set_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), RegistryError>;

    async fn get(&self, id: SubscriptionId) -> Result<Subscription, RegistryError>;

    /// All active subscriptions whose `events` set contains the type.
    /// Order is unspecified; callers must not depend on it.
    async fn find_active_for_event(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, RegistryError>;
}

/// Reject malformed subscription data before it is persisted.
pub(crate) fn validate(subscription: &Subscription) -> Result<(), RegistryError> {
    let scheme = subscription.url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(RegistryError::Validation(format!(
            "unsupported url scheme: {}",
            scheme
        )));
    }

    if subscription.url.host_str().is_none() {
        return Err(RegistryError::Validation("url has no host".to_string()));
    }

    if subscription.events.is_empty() {
        return Err(RegistryError::Validation(
            "subscription has no event types".to_string(),
        ));
    }

    if subscription.timeout.is_zero() {
        return Err(RegistryError::Validation(
            "timeout must be positive".to_string(),
        ));
    }

    if subscription.name.trim().is_empty() {
        return Err(RegistryError::Validation("name is empty".to_string()));
    }

    Ok(())
}

/// In-memory registry for embedded and test deployments.
#[derive(Default)]
pub struct InMemoryRegistry {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn create(&self, subscription: Subscription) -> Result<SubscriptionId, RegistryError> {
        validate(&subscription)?;
        let id = subscription.id;
        let mut guard = self.subscriptions.write().await;
        guard.insert(id, subscription);
        Ok(id)
    }

    async fn update(
        &self,
        id: SubscriptionId,
        mut subscription: Subscription,
    ) -> Result<(), RegistryError> {
        subscription.id = id;
        validate(&subscription)?;

        let mut guard = self.subscriptions.write().await;
        match guard.get_mut(&id) {
            Some(slot) => {
                *slot = subscription;
                Ok(())
            }
            None => Err(RegistryError::NotFound(id)),
        }
    }

    async fn delete(&self, id: SubscriptionId) -> Result<(), RegistryError> {
        let mut guard = self.subscriptions.write().await;
        match guard.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound(id)),
        }
    }

    async fn set_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), RegistryError> {
        let mut guard = self.subscriptions.write().await;
        match guard.get_mut(&id) {
            Some(subscription) => {
                subscription.status = status;
                Ok(())
            }
            None => Err(RegistryError::NotFound(id)),
        }
    }

    async fn get(&self, id: SubscriptionId) -> Result<Subscription, RegistryError> {
        let guard = self.subscriptions.read().await;
        guard.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    async fn find_active_for_event(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, RegistryError> {
        let guard = self.subscriptions.read().await;
        Ok(guard
            .values()
            .filter(|s| s.is_active() && s.events.contains(&event_type))
            .cloned()
            .collect())
    }
}
