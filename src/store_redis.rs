#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use chrono::{DateTime, Utc};
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[cfg(feature = "redis")]
use crate::error::{LogError, RegistryError};
#[cfg(feature = "redis")]
use crate::log::DeliveryLog;
#[cfg(feature = "redis")]
use crate::registry::{validate, Registry};
#[cfg(feature = "redis")]
use crate::types::{
    AttemptId, AttemptStatus, DeliveryAttempt, DeliveryId, EventType, Subscription,
    SubscriptionId, SubscriptionStatus,
};

/// Redis-backed registry and delivery log.
///
/// Subscriptions and attempts live in hashes keyed by id; due retries
/// are indexed in a sorted set scored by `next_retry_at`, so the
/// scheduler poll is a range query instead of a scan.
#[cfg(feature = "redis")]
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

#[cfg(feature = "redis")]
impl RedisStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn subscriptions_key(&self) -> String {
        format!("{}:subscriptions", self.prefix)
    }

    fn attempts_key(&self) -> String {
        format!("{}:attempts", self.prefix)
    }

    fn due_key(&self) -> String {
        format!("{}:retry_due", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, String> {
        self.client
            .get_tokio_connection()
            .await
            .map_err(|e| e.to_string())
    }

    /// Keep the due index in line with one attempt row.
    async fn index_attempt(
        &self,
        conn: &mut redis::aio::Connection,
        attempt: &DeliveryAttempt,
    ) -> Result<(), String> {
        match (attempt.status, attempt.next_retry_at) {
            (AttemptStatus::Failed, Some(at)) => {
                let _: () = conn
                    .zadd(
                        self.due_key(),
                        attempt.id.to_string(),
                        at.timestamp_millis() as f64,
                    )
                    .await
                    .map_err(|e| e.to_string())?;
            }
            _ => {
                let _: () = conn
                    .zrem(self.due_key(), attempt.id.to_string())
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl Registry for RedisStore {
    async fn create(&self, subscription: Subscription) -> Result<SubscriptionId, RegistryError> {
        validate(&subscription)?;
        let id = subscription.id;
        let body =
            serde_json::to_string(&subscription).map_err(|e| RegistryError::Storage(e.to_string()))?;

        let mut conn = self.connection().await.map_err(RegistryError::Storage)?;
        let _: () = conn
            .hset(self.subscriptions_key(), id.to_string(), body)
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        Ok(id)
    }

    async fn update(
        &self,
        id: SubscriptionId,
        mut subscription: Subscription,
    ) -> Result<(), RegistryError> {
        subscription.id = id;
        validate(&subscription)?;

        let mut conn = self.connection().await.map_err(RegistryError::Storage)?;
        let exists: bool = conn
            .hexists(self.subscriptions_key(), id.to_string())
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        if !exists {
            return Err(RegistryError::NotFound(id));
        }

        let body =
            serde_json::to_string(&subscription).map_err(|e| RegistryError::Storage(e.to_string()))?;
        let _: () = conn
            .hset(self.subscriptions_key(), id.to_string(), body)
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<(), RegistryError> {
        let mut conn = self.connection().await.map_err(RegistryError::Storage)?;
        let removed: i64 = conn
            .hdel(self.subscriptions_key(), id.to_string())
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        if removed == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<(), RegistryError> {
        let mut subscription = Registry::get(self, id).await?;
        subscription.status = status;
        Registry::update(self, id, subscription).await
    }

    async fn get(&self, id: SubscriptionId) -> Result<Subscription, RegistryError> {
        let mut conn = self.connection().await.map_err(RegistryError::Storage)?;
        let body: Option<String> = conn
            .hget(self.subscriptions_key(), id.to_string())
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;

        let body = body.ok_or(RegistryError::NotFound(id))?;
        serde_json::from_str(&body).map_err(|e| RegistryError::Storage(e.to_string()))
    }

    async fn find_active_for_event(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, RegistryError> {
        let mut conn = self.connection().await.map_err(RegistryError::Storage)?;
        let entries: std::collections::HashMap<String, String> = conn
            .hgetall(self.subscriptions_key())
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;

        Ok(entries
            .into_values()
            .filter_map(|body| serde_json::from_str::<Subscription>(&body).ok())
            .filter(|sub| sub.is_active() && sub.events.contains(&event_type))
            .collect())
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl DeliveryLog for RedisStore {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<AttemptId, LogError> {
        let body = serde_json::to_string(attempt).map_err(|e| LogError::Storage(e.to_string()))?;

        let mut conn = self.connection().await.map_err(LogError::Storage)?;
        let _: () = conn
            .hset(self.attempts_key(), attempt.id.to_string(), body)
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;
        self.index_attempt(&mut conn, attempt)
            .await
            .map_err(LogError::Storage)?;
        Ok(attempt.id)
    }

    async fn update(&self, attempt: &DeliveryAttempt) -> Result<(), LogError> {
        let mut conn = self.connection().await.map_err(LogError::Storage)?;
        let exists: bool = conn
            .hexists(self.attempts_key(), attempt.id.to_string())
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;
        if !exists {
            return Err(LogError::NotFound(attempt.id));
        }

        let body = serde_json::to_string(attempt).map_err(|e| LogError::Storage(e.to_string()))?;
        let _: () = conn
            .hset(self.attempts_key(), attempt.id.to_string(), body)
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;
        self.index_attempt(&mut conn, attempt)
            .await
            .map_err(LogError::Storage)?;
        Ok(())
    }

    async fn get(&self, id: AttemptId) -> Result<DeliveryAttempt, LogError> {
        let mut conn = self.connection().await.map_err(LogError::Storage)?;
        let body: Option<String> = conn
            .hget(self.attempts_key(), id.to_string())
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;

        let body = body.ok_or(LogError::NotFound(id))?;
        serde_json::from_str(&body).map_err(|e| LogError::Storage(e.to_string()))
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>, LogError> {
        let mut conn = self.connection().await.map_err(LogError::Storage)?;
        let ids: Vec<String> = conn
            .zrangebyscore(self.due_key(), "-inf", now.timestamp_millis() as f64)
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;

        let mut due = Vec::with_capacity(ids.len());
        for id in ids {
            let body: Option<String> = conn
                .hget(self.attempts_key(), &id)
                .await
                .map_err(|e| LogError::Storage(e.to_string()))?;
            if let Some(body) = body {
                if let Ok(attempt) = serde_json::from_str::<DeliveryAttempt>(&body) {
                    due.push(attempt);
                }
            }
        }
        Ok(due)
    }

    async fn find_by_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Vec<DeliveryAttempt>, LogError> {
        let mut conn = self.connection().await.map_err(LogError::Storage)?;
        let entries: std::collections::HashMap<String, String> = conn
            .hgetall(self.attempts_key())
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;

        let mut chain: Vec<DeliveryAttempt> = entries
            .into_values()
            .filter_map(|body| serde_json::from_str::<DeliveryAttempt>(&body).ok())
            .filter(|a| a.delivery_id == delivery_id)
            .collect();
        chain.sort_by_key(|a| a.attempt_number);
        Ok(chain)
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64, LogError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));

        let mut conn = self.connection().await.map_err(LogError::Storage)?;
        let entries: std::collections::HashMap<String, String> = conn
            .hgetall(self.attempts_key())
            .await
            .map_err(|e| LogError::Storage(e.to_string()))?;

        let mut deleted = 0u64;
        for (id, body) in entries {
            let Ok(attempt) = serde_json::from_str::<DeliveryAttempt>(&body) else {
                continue;
            };
            if attempt.created_at < cutoff {
                let _: () = conn
                    .hdel(self.attempts_key(), &id)
                    .await
                    .map_err(|e| LogError::Storage(e.to_string()))?;
                let _: () = conn
                    .zrem(self.due_key(), &id)
                    .await
                    .map_err(|e| LogError::Storage(e.to_string()))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
