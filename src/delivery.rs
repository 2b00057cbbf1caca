use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DeliveryError, LogError, RegistryError, RetryError};
use crate::log::DeliveryLog;
use crate::registry::{validate, Registry};
use crate::signing::{header_value, sign, SignatureAlgorithm};
use crate::transport::{DeliveryTransport, OutboundRequest, TransportError};
use crate::types::{
    AttemptId, AttemptStatus, DeliveryAttempt, DeliveryId, Event, EventType, Subscription,
    SubscriptionId,
};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[cfg(feature = "tracing")]
fn trace_event(message: &'static str) {
    tracing::info!(message);
}

#[cfg(not(feature = "tracing"))]
fn trace_event(_message: &'static str) {}

/// Service-wide delivery settings, injected at construction.
///
/// Administrative updates build a fresh config and a fresh service;
/// nothing here is mutated in place.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Fallback signing secret for subscriptions without their own.
    pub secret: Option<String>,

    /// Header carrying the `{algorithm}={hex}` signature.
    pub signature_header: String,

    pub algorithm: SignatureAlgorithm,

    /// Upper bound of random jitter added to each backoff delay.
    pub retry_jitter: Duration,

    /// When false, 4xx responses exhaust the chain immediately instead
    /// of consuming retry budget.
    pub retry_client_errors: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            secret: None,
            signature_header: "X-Webhook-Signature".to_string(),
            algorithm: SignatureAlgorithm::Sha256,
            retry_jitter: Duration::ZERO,
            retry_client_errors: true,
        }
    }
}

/// The envelope every subscriber receives as the request body.
#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    timestamp: DateTime<Utc>,
    delivery_id: DeliveryId,
    payload: &'a serde_json::Value,
}

/// Performs HTTP delivery of events to subscriptions and owns the
/// retry chain lifecycle.
///
/// Every attempt is persisted to the delivery log before its outcome
/// is known and updated after classification, so a chain can always be
/// audited and resumed. Attempts within one chain are strictly
/// sequential: a retry is only ever issued from a persisted failed row.
pub struct DeliveryService {
    registry: Arc<dyn Registry>,
    log: Arc<dyn DeliveryLog>,
    transport: Arc<dyn DeliveryTransport>,
    config: DeliveryConfig,
}

impl DeliveryService {
    pub fn new(
        registry: Arc<dyn Registry>,
        log: Arc<dyn DeliveryLog>,
        transport: Arc<dyn DeliveryTransport>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            registry,
            log,
            transport,
            config,
        }
    }

    pub fn log(&self) -> &Arc<dyn DeliveryLog> {
        &self.log
    }

    /// First attempt of a new chain for one subscription and one event
    /// occurrence.
    ///
    /// HTTP failures do not surface as errors; they are classified and
    /// recorded on the returned attempt row. Only storage failures and
    /// a subscription that fails the defensive re-check propagate.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        event: &Event,
    ) -> Result<DeliveryAttempt, DeliveryError> {
        self.deliver_with_id(subscription, event, DeliveryId::generate())
            .await
    }

    /// Same as [`deliver`](Self::deliver) with a caller-assigned chain
    /// id, so the dispatcher can report the id before the attempt runs.
    pub(crate) async fn deliver_with_id(
        &self,
        subscription: &Subscription,
        event: &Event,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryAttempt, DeliveryError> {
        validate(subscription).map_err(|e| DeliveryError::Validation(e.to_string()))?;

        let snapshot = self.serialize_envelope(event, delivery_id)?;
        let attempt = new_attempt(subscription.id, event.event_type, delivery_id, snapshot, 1);

        self.log.append(&attempt).await?;
        self.run_attempt(subscription, attempt, true).await
    }

    /// Re-invoke delivery for a failed attempt, issuing attempt N+1
    /// from the original payload snapshot.
    ///
    /// The origin row's `next_retry_at` is consumed first, which keeps
    /// scheduled processing idempotent. If the subscription went
    /// inactive since the failure, the row is marked exhausted without
    /// a send.
    pub async fn retry(&self, attempt_id: AttemptId) -> Result<DeliveryAttempt, RetryError> {
        let mut origin = self.log.get(attempt_id).await.map_err(retry_error)?;

        let retryable =
            origin.status == AttemptStatus::Failed && origin.next_retry_at.is_some();
        if !retryable {
            return Err(RetryError::AlreadyTerminal(attempt_id));
        }

        let subscription = match self.registry.get(origin.subscription_id).await {
            Ok(s) => s,
            Err(RegistryError::NotFound(id)) => {
                origin.status = AttemptStatus::Exhausted;
                origin.next_retry_at = None;
                origin.error = Some("subscription deleted; retry cancelled".to_string());
                self.log.update(&origin).await.map_err(retry_error)?;
                metric_inc("webhook.retry.subscription_gone");
                return Err(RetryError::SubscriptionGone(id));
            }
            Err(e) => return Err(RetryError::Storage(e.to_string())),
        };

        if !subscription.is_active() {
            origin.status = AttemptStatus::Exhausted;
            origin.next_retry_at = None;
            origin.error = Some("subscription inactive; retry cancelled".to_string());
            self.log.update(&origin).await.map_err(retry_error)?;
            metric_inc("webhook.retry.cancelled_inactive");
            trace_event("webhook.retry.cancelled_inactive");
            return Ok(origin);
        }

        origin.next_retry_at = None;
        self.log.update(&origin).await.map_err(retry_error)?;

        let attempt = new_attempt(
            origin.subscription_id,
            origin.event_type,
            origin.delivery_id,
            origin.payload_snapshot.clone(),
            origin.attempt_number + 1,
        );
        self.log.append(&attempt).await.map_err(retry_error)?;

        self.run_attempt(&subscription, attempt, true)
            .await
            .map_err(|e| RetryError::Storage(e.to_string()))
    }

    /// Process every due retry in the log. Invoked periodically by the
    /// scheduler; idempotent per call since issuing a retry consumes
    /// the row's `next_retry_at`.
    ///
    /// Returns the number of due rows processed (sends issued plus
    /// stale rows cancelled for inactive subscriptions).
    pub async fn process_pending_retries(&self) -> Result<usize, DeliveryError> {
        let due = self.log.find_due_retries(Utc::now()).await?;
        let mut processed = 0usize;

        for row in due {
            match self.retry(row.id).await {
                Ok(_) | Err(RetryError::SubscriptionGone(_)) => processed += 1,
                // Raced with a concurrent retry of the same row.
                Err(RetryError::AlreadyTerminal(_)) | Err(RetryError::NotFound(_)) => {}
                Err(RetryError::Storage(reason)) => {
                    trace_event("webhook.retry.storage_error");
                    return Err(DeliveryError::Storage(reason));
                }
            }
        }

        Ok(processed)
    }

    /// Operator-triggered connectivity check.
    ///
    /// Sends a synthetic `webhook.test` event and logs the outcome,
    /// but never schedules a retry: the row ends terminal either way
    /// and real delivery chains are untouched. Works on inactive
    /// subscriptions so operators can probe before enabling.
    pub async fn test(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<DeliveryAttempt, RegistryError> {
        let subscription = self.registry.get(subscription_id).await?;

        let event = Event::new(
            EventType::WebhookTest,
            serde_json::json!({
                "test": true,
                "subscription_id": subscription.id,
                "name": subscription.name,
            }),
        );

        let delivery_id = DeliveryId::generate();
        let snapshot = self
            .serialize_envelope(&event, delivery_id)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let attempt = new_attempt(subscription.id, event.event_type, delivery_id, snapshot, 1);

        self.log
            .append(&attempt)
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))?;

        metric_inc("webhook.delivery.test");
        self.run_attempt(&subscription, attempt, false)
            .await
            .map_err(|e| RegistryError::Storage(e.to_string()))
    }

    fn serialize_envelope(
        &self,
        event: &Event,
        delivery_id: DeliveryId,
    ) -> Result<String, DeliveryError> {
        let envelope = Envelope {
            event: event.event_type.as_str(),
            timestamp: Utc::now(),
            delivery_id,
            payload: &event.payload,
        };
        serde_json::to_string(&envelope)
            .map_err(|e| DeliveryError::Storage(format!("envelope serialization: {}", e)))
    }

    /// Send one persisted `Pending` attempt and record its outcome.
    async fn run_attempt(
        &self,
        subscription: &Subscription,
        mut attempt: DeliveryAttempt,
        allow_retry: bool,
    ) -> Result<DeliveryAttempt, DeliveryError> {
        let body = attempt.payload_snapshot.clone().into_bytes();

        let secret = subscription
            .secret
            .as_deref()
            .or(self.config.secret.as_deref());

        // An empty secret is misconfiguration: resending cannot succeed,
        // so the row goes terminal without a request on the wire.
        if let Some("") = secret {
            attempt.status = AttemptStatus::Exhausted;
            attempt.error = Some(
                DeliveryError::Signature("signing secret is empty".to_string()).to_string(),
            );
            self.log.update(&attempt).await?;
            metric_inc("webhook.delivery.signature_error");
            return Ok(attempt);
        }

        let mut headers: Vec<(String, String)> = Vec::with_capacity(
            3 + subscription.headers.len() + usize::from(secret.is_some()),
        );
        headers.push(("Content-Type".to_string(), subscription.content_type.clone()));
        headers.push((
            "X-Webhook-Event".to_string(),
            attempt.event_type.as_str().to_string(),
        ));
        headers.push((
            "X-Webhook-Delivery".to_string(),
            attempt.delivery_id.to_string(),
        ));

        if let Some(secret) = secret {
            let digest = sign(secret.as_bytes(), &body, self.config.algorithm);
            headers.push((
                self.config.signature_header.clone(),
                header_value(&digest, self.config.algorithm),
            ));
        }

        for (name, value) in &subscription.headers {
            headers.push((name.clone(), value.clone()));
        }

        let request = OutboundRequest {
            method: subscription.http_method,
            url: subscription.url.clone(),
            headers,
            body,
            timeout: subscription.timeout,
            verify_ssl: subscription.verify_ssl,
        };

        let failure = match self.transport.execute(&request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                attempt.status = AttemptStatus::Success;
                attempt.http_status = Some(response.status);
                attempt.next_retry_at = None;
                self.log.update(&attempt).await?;
                metric_inc("webhook.delivery.success");
                trace_event("webhook.delivery.success");
                return Ok(attempt);
            }
            Ok(response) => {
                attempt.http_status = Some(response.status);
                DeliveryError::Http {
                    status: response.status,
                }
            }
            Err(TransportError::Timeout) => {
                DeliveryError::Network("request timed out".to_string())
            }
            Err(TransportError::Network(reason)) => DeliveryError::Network(reason),
        };

        attempt.error = Some(failure.to_string());
        metric_inc("webhook.delivery.failure");
        trace_event("webhook.delivery.failure");

        let budget_left = attempt.attempt_number <= subscription.retry_count;
        if allow_retry && budget_left && failure.is_retryable(self.config.retry_client_errors) {
            attempt.status = AttemptStatus::Failed;
            attempt.next_retry_at = Some(
                attempt.created_at
                    + backoff_delay(
                        attempt.attempt_number,
                        subscription.retry_delay,
                        self.config.retry_jitter,
                    ),
            );
            metric_inc("webhook.delivery.retry_scheduled");
        } else {
            attempt.status = AttemptStatus::Exhausted;
            attempt.next_retry_at = None;
            metric_inc("webhook.delivery.exhausted");
        }

        self.log.update(&attempt).await?;
        Ok(attempt)
    }
}

fn new_attempt(
    subscription_id: SubscriptionId,
    event_type: EventType,
    delivery_id: DeliveryId,
    payload_snapshot: String,
    attempt_number: u32,
) -> DeliveryAttempt {
    DeliveryAttempt {
        id: AttemptId::generate(),
        delivery_id,
        subscription_id,
        event_type,
        payload_snapshot,
        attempt_number,
        status: AttemptStatus::Pending,
        http_status: None,
        error: None,
        created_at: Utc::now(),
        next_retry_at: None,
    }
}

fn retry_error(err: LogError) -> RetryError {
    match err {
        LogError::NotFound(id) => RetryError::NotFound(id),
        LogError::Storage(reason) => RetryError::Storage(reason),
    }
}

/// Exponential backoff: `retry_delay * 2^(attempt_number - 1)`, plus
/// optional uniform jitter.
fn backoff_delay(attempt_number: u32, base: Duration, jitter: Duration) -> chrono::Duration {
    // Shift capped so the factor cannot overflow; budgets this deep
    // never occur in practice.
    let exp = attempt_number.saturating_sub(1).min(20);
    let factor = 1u64 << exp;
    let mut delay_ms = (base.as_millis() as u64).saturating_mul(factor);

    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms > 0 {
        delay_ms = delay_ms.saturating_add(fastrand::u64(0..=jitter_ms));
    }

    chrono::Duration::milliseconds(delay_ms.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(60);
        assert_eq!(
            backoff_delay(1, base, Duration::ZERO),
            chrono::Duration::seconds(60)
        );
        assert_eq!(
            backoff_delay(2, base, Duration::ZERO),
            chrono::Duration::seconds(120)
        );
        assert_eq!(
            backoff_delay(4, base, Duration::ZERO),
            chrono::Duration::seconds(480)
        );
    }

    #[test]
    fn backoff_jitter_stays_bounded() {
        let base = Duration::from_secs(1);
        let jitter = Duration::from_millis(500);
        for attempt in 1..=5u32 {
            let plain = backoff_delay(attempt, base, Duration::ZERO);
            let jittered = backoff_delay(attempt, base, jitter);
            assert!(jittered >= plain);
            assert!(jittered <= plain + chrono::Duration::milliseconds(500));
        }
    }
}
