#[cfg(feature = "postgres")]
use std::time::Duration;

#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use chrono::{DateTime, Utc};
#[cfg(feature = "postgres")]
use tokio_postgres::Client;

#[cfg(feature = "postgres")]
use crate::error::{LogError, RegistryError};
#[cfg(feature = "postgres")]
use crate::log::DeliveryLog;
#[cfg(feature = "postgres")]
use crate::registry::{validate, Registry};
#[cfg(feature = "postgres")]
use crate::types::{
    AttemptId, DeliveryAttempt, DeliveryId, EventType, Subscription, SubscriptionId,
    SubscriptionStatus,
};

/// Postgres-backed registry and delivery log.
///
/// Subscriptions and attempts are stored as JSONB bodies with the
/// columns the queries need (status, retry due time, creation time)
/// lifted out alongside.
#[cfg(feature = "postgres")]
pub struct PostgresStore {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_subscriptions (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    body JSONB NOT NULL
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_attempts (
                    id TEXT PRIMARY KEY,
                    delivery_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    next_retry_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL,
                    body JSONB NOT NULL
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE INDEX IF NOT EXISTS webhook_attempts_due
                 ON webhook_attempts (next_retry_at)
                 WHERE status = 'failed'",
                &[],
            )
            .await?;

        Ok(Self { client })
    }

    fn encode_subscription(sub: &Subscription) -> Result<serde_json::Value, RegistryError> {
        serde_json::to_value(sub).map_err(|e| RegistryError::Storage(e.to_string()))
    }

    fn encode_attempt(attempt: &DeliveryAttempt) -> Result<serde_json::Value, LogError> {
        serde_json::to_value(attempt).map_err(|e| LogError::Storage(e.to_string()))
    }
}

#[cfg(feature = "postgres")]
fn registry_err(err: tokio_postgres::Error) -> RegistryError {
    RegistryError::Storage(err.to_string())
}

#[cfg(feature = "postgres")]
fn log_err(err: tokio_postgres::Error) -> LogError {
    LogError::Storage(err.to_string())
}

#[cfg(feature = "postgres")]
#[async_trait]
impl Registry for PostgresStore {
    async fn create(&self, subscription: Subscription) -> Result<SubscriptionId, RegistryError> {
        validate(&subscription)?;
        let id = subscription.id;
        let body = Self::encode_subscription(&subscription)?;

        self.client
            .execute(
                "INSERT INTO webhook_subscriptions (id, status, body)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE
                 SET status = EXCLUDED.status, body = EXCLUDED.body",
                &[
                    &id.to_string(),
                    &status_str(subscription.status),
                    &body,
                ],
            )
            .await
            .map_err(registry_err)?;

        Ok(id)
    }

    async fn update(
        &self,
        id: SubscriptionId,
        mut subscription: Subscription,
    ) -> Result<(), RegistryError> {
        subscription.id = id;
        validate(&subscription)?;
        let body = Self::encode_subscription(&subscription)?;

        let updated = self
            .client
            .execute(
                "UPDATE webhook_subscriptions
                 SET status = $2, body = $3
                 WHERE id = $1",
                &[
                    &id.to_string(),
                    &status_str(subscription.status),
                    &body,
                ],
            )
            .await
            .map_err(registry_err)?;

        if updated == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<(), RegistryError> {
        let deleted = self
            .client
            .execute(
                "DELETE FROM webhook_subscriptions WHERE id = $1",
                &[&id.to_string()],
            )
            .await
            .map_err(registry_err)?;

        if deleted == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), RegistryError> {
        let status = status_str(status);
        let updated = self
            .client
            .execute(
                "UPDATE webhook_subscriptions
                 SET status = $2,
                     body = jsonb_set(body, '{status}', to_jsonb($2::text))
                 WHERE id = $1",
                &[&id.to_string(), &status],
            )
            .await
            .map_err(registry_err)?;

        if updated == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: SubscriptionId) -> Result<Subscription, RegistryError> {
        let rows = self
            .client
            .query(
                "SELECT body FROM webhook_subscriptions WHERE id = $1",
                &[&id.to_string()],
            )
            .await
            .map_err(registry_err)?;

        let row = rows.first().ok_or(RegistryError::NotFound(id))?;
        let body: serde_json::Value = row.try_get(0).map_err(registry_err)?;
        serde_json::from_value(body).map_err(|e| RegistryError::Storage(e.to_string()))
    }

    async fn find_active_for_event(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, RegistryError> {
        let rows = self
            .client
            .query(
                "SELECT body FROM webhook_subscriptions WHERE status = 'active'",
                &[],
            )
            .await
            .map_err(registry_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|body| serde_json::from_value::<Subscription>(body).ok())
            .filter(|sub| sub.events.contains(&event_type))
            .collect())
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl DeliveryLog for PostgresStore {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<AttemptId, LogError> {
        let body = Self::encode_attempt(attempt)?;
        self.client
            .execute(
                "INSERT INTO webhook_attempts
                 (id, delivery_id, status, next_retry_at, created_at, body)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &attempt.id.to_string(),
                    &attempt.delivery_id.to_string(),
                    &attempt.status.as_str(),
                    &attempt.next_retry_at,
                    &attempt.created_at,
                    &body,
                ],
            )
            .await
            .map_err(log_err)?;

        Ok(attempt.id)
    }

    async fn update(&self, attempt: &DeliveryAttempt) -> Result<(), LogError> {
        let body = Self::encode_attempt(attempt)?;
        let updated = self
            .client
            .execute(
                "UPDATE webhook_attempts
                 SET status = $2, next_retry_at = $3, body = $4
                 WHERE id = $1",
                &[
                    &attempt.id.to_string(),
                    &attempt.status.as_str(),
                    &attempt.next_retry_at,
                    &body,
                ],
            )
            .await
            .map_err(log_err)?;

        if updated == 0 {
            return Err(LogError::NotFound(attempt.id));
        }
        Ok(())
    }

    async fn get(&self, id: AttemptId) -> Result<DeliveryAttempt, LogError> {
        let rows = self
            .client
            .query(
                "SELECT body FROM webhook_attempts WHERE id = $1",
                &[&id.to_string()],
            )
            .await
            .map_err(log_err)?;

        let row = rows.first().ok_or(LogError::NotFound(id))?;
        let body: serde_json::Value = row.try_get(0).map_err(log_err)?;
        serde_json::from_value(body).map_err(|e| LogError::Storage(e.to_string()))
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>, LogError> {
        let rows = self
            .client
            .query(
                "SELECT body FROM webhook_attempts
                 WHERE status = 'failed'
                   AND next_retry_at IS NOT NULL
                   AND next_retry_at <= $1",
                &[&now],
            )
            .await
            .map_err(log_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|body| serde_json::from_value(body).ok())
            .collect())
    }

    async fn find_by_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Vec<DeliveryAttempt>, LogError> {
        let rows = self
            .client
            .query(
                "SELECT body FROM webhook_attempts WHERE delivery_id = $1",
                &[&delivery_id.to_string()],
            )
            .await
            .map_err(log_err)?;

        let mut chain: Vec<DeliveryAttempt> = rows
            .into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|body| serde_json::from_value(body).ok())
            .collect();
        chain.sort_by_key(|a: &DeliveryAttempt| a.attempt_number);
        Ok(chain)
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64, LogError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));

        self.client
            .execute(
                "DELETE FROM webhook_attempts WHERE created_at < $1",
                &[&cutoff],
            )
            .await
            .map_err(log_err)
    }
}

#[cfg(feature = "postgres")]
fn status_str(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::Inactive => "inactive",
    }
}
