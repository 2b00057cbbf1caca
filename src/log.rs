use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::LogError;
use crate::types::{AttemptId, AttemptStatus, DeliveryAttempt, DeliveryId};

/// Persisted record of every delivery attempt.
///
/// The log is the retry store: the scheduler finds due work here, and
/// exhaustion is visible here rather than as an error to any caller.
/// Appends from concurrent deliveries must not lose entries; rows are
/// keyed by unique attempt ids.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<AttemptId, LogError>;

    /// Overwrite an existing row, keyed by `attempt.id`. Rows are
    /// created `Pending` and mutated to their outcome after each HTTP
    /// attempt.
    async fn update(&self, attempt: &DeliveryAttempt) -> Result<(), LogError>;

    async fn get(&self, id: AttemptId) -> Result<DeliveryAttempt, LogError>;

    /// Rows with `status = failed` whose `next_retry_at` is due.
    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>, LogError>;

    /// Every attempt of one retry chain, ordered by attempt number.
    async fn find_by_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Vec<DeliveryAttempt>, LogError>;

    /// Delete rows older than the retention window regardless of
    /// status. This is the only deletion path; subscription deletion
    /// never cascades here.
    async fn cleanup(&self, retention: Duration) -> Result<u64, LogError>;
}

/// In-memory delivery log for embedded and test deployments.
#[derive(Default)]
pub struct InMemoryDeliveryLog {
    attempts: Mutex<HashMap<AttemptId, DeliveryAttempt>>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for operator inspection and tests.
    pub async fn all(&self) -> Vec<DeliveryAttempt> {
        let guard = self.attempts.lock().await;
        let mut rows: Vec<DeliveryAttempt> = guard.values().cloned().collect();
        rows.sort_by_key(|a| a.created_at);
        rows
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn append(&self, attempt: &DeliveryAttempt) -> Result<AttemptId, LogError> {
        let mut guard = self.attempts.lock().await;
        guard.insert(attempt.id, attempt.clone());
        Ok(attempt.id)
    }

    async fn update(&self, attempt: &DeliveryAttempt) -> Result<(), LogError> {
        let mut guard = self.attempts.lock().await;
        match guard.get_mut(&attempt.id) {
            Some(slot) => {
                *slot = attempt.clone();
                Ok(())
            }
            None => Err(LogError::NotFound(attempt.id)),
        }
    }

    async fn get(&self, id: AttemptId) -> Result<DeliveryAttempt, LogError> {
        let guard = self.attempts.lock().await;
        guard.get(&id).cloned().ok_or(LogError::NotFound(id))
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>, LogError> {
        let guard = self.attempts.lock().await;
        Ok(guard
            .values()
            .filter(|a| {
                a.status == AttemptStatus::Failed
                    && a.next_retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn find_by_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Vec<DeliveryAttempt>, LogError> {
        let guard = self.attempts.lock().await;
        let mut chain: Vec<DeliveryAttempt> = guard
            .values()
            .filter(|a| a.delivery_id == delivery_id)
            .cloned()
            .collect();
        chain.sort_by_key(|a| a.attempt_number);
        Ok(chain)
    }

    async fn cleanup(&self, retention: Duration) -> Result<u64, LogError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        let mut guard = self.attempts.lock().await;
        let before = guard.len();
        guard.retain(|_, a| a.created_at >= cutoff);
        Ok((before - guard.len()) as u64)
    }
}
