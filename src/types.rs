use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::filter::Condition;

/// Unique identifier for a webhook subscription.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of subscription ids with other identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a single delivery attempt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier shared by every attempt in one retry chain
/// (one event occurrence delivered to one subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Domain events that can be delivered to subscribers.
///
/// The set of event types is fixed at compile time; subscriptions
/// referencing an unknown type string are rejected at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventType {
    BookingCreated,
    BookingUpdated,
    BookingCancelled,
    BookingCompleted,
    PaymentCompleted,
    PaymentFailed,
    PaymentRefunded,
    CustomerCreated,
    CustomerUpdated,
    /// Synthetic event used by operator-triggered connectivity checks.
    WebhookTest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BookingCreated => "booking.created",
            EventType::BookingUpdated => "booking.updated",
            EventType::BookingCancelled => "booking.cancelled",
            EventType::BookingCompleted => "booking.completed",
            EventType::PaymentCompleted => "payment.completed",
            EventType::PaymentFailed => "payment.failed",
            EventType::PaymentRefunded => "payment.refunded",
            EventType::CustomerCreated => "customer.created",
            EventType::CustomerUpdated => "customer.updated",
            EventType::WebhookTest => "webhook.test",
        }
    }

    /// All event types an operator can subscribe to.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::BookingCreated,
            EventType::BookingUpdated,
            EventType::BookingCancelled,
            EventType::BookingCompleted,
            EventType::PaymentCompleted,
            EventType::PaymentFailed,
            EventType::PaymentRefunded,
            EventType::CustomerCreated,
            EventType::CustomerUpdated,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event-type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking.created" => Ok(EventType::BookingCreated),
            "booking.updated" => Ok(EventType::BookingUpdated),
            "booking.cancelled" => Ok(EventType::BookingCancelled),
            "booking.completed" => Ok(EventType::BookingCompleted),
            "payment.completed" => Ok(EventType::PaymentCompleted),
            "payment.failed" => Ok(EventType::PaymentFailed),
            "payment.refunded" => Ok(EventType::PaymentRefunded),
            "customer.created" => Ok(EventType::CustomerCreated),
            "customer.updated" => Ok(EventType::CustomerUpdated),
            "webhook.test" => Ok(EventType::WebhookTest),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}

impl TryFrom<String> for EventType {
    type Error = UnknownEventType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

/// A domain event handed to the dispatcher by the host application.
///
/// The payload is structured JSON relevant to the event (booking ids,
/// amounts, timestamps). It is embedded into each delivery attempt's
/// snapshot and never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self { event_type, payload }
    }
}

/// HTTP methods a subscription may use for delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
        }
    }
}

/// Whether a subscription is eligible for event matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
}

/// A persisted record describing where and how to deliver events
/// for one external consumer.
///
/// Subscriptions are pure configuration with no internal state and must
/// be registered through the [`Registry`](crate::Registry) before they
/// receive anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Logical identifier, assigned at construction.
    pub id: SubscriptionId,

    /// Human label shown to operators.
    pub name: String,

    /// Destination endpoint. Only `http` and `https` schemes are accepted.
    pub url: Url,

    /// Event types this subscription wants. An empty set receives nothing
    /// and is rejected by the registry.
    pub events: BTreeSet<EventType>,

    /// HTTP method used for delivery.
    pub http_method: HttpMethod,

    /// Value of the outgoing `Content-Type` header.
    pub content_type: String,

    /// Extra headers applied to every request.
    pub headers: HashMap<String, String>,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Maximum retry attempts after the first failure.
    pub retry_count: u32,

    /// Base delay before the first retry; unit for exponential backoff.
    pub retry_delay: Duration,

    /// Whether TLS certificate validation is enforced.
    pub verify_ssl: bool,

    /// Payload predicates; every condition must match for the
    /// subscription to be selected. Empty means unconditional.
    pub conditions: Vec<Condition>,

    /// Signing secret overriding the service-wide one.
    pub secret: Option<String>,

    pub status: SubscriptionStatus,

    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a new subscription with default delivery settings.
    ///
    /// Defaults:
    /// - method: POST, content type: application/json
    /// - timeout: 30 seconds
    /// - retry_count: 3, retry_delay: 60 seconds
    /// - verify_ssl: true, status: active
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            id: SubscriptionId::generate(),
            name: name.into(),
            url,
            events: BTreeSet::new(),
            http_method: HttpMethod::Post,
            content_type: "application/json".to_string(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(30),
            retry_count: 3,
            retry_delay: Duration::from_secs(60),
            verify_ssl: true,
            conditions: Vec::new(),
            secret: None,
            status: SubscriptionStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Subscribe to the given event types.
    pub fn with_events(mut self, events: impl IntoIterator<Item = EventType>) -> Self {
        self.events.extend(events);
        self
    }

    /// Set the HTTP method used for delivery.
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.http_method = method;
        self
    }

    /// Set the outgoing `Content-Type` header value.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Add an extra header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget and the backoff base delay.
    pub fn with_retry_policy(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    /// Enable or disable TLS certificate validation.
    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    /// Add a payload condition; all conditions must match.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set a per-subscription signing secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Delivery lifecycle status of one attempt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Row created, HTTP attempt not yet classified.
    Pending,
    /// Destination answered 2xx. Terminal.
    Success,
    /// Attempt failed; `next_retry_at` is set while budget remains.
    Failed,
    /// Retry budget consumed, or terminal failure without retry. Terminal.
    Exhausted,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Success | AttemptStatus::Exhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP try (initial or retry) for one subscription against one
/// event occurrence.
///
/// Rows are created `Pending`, mutated to their outcome after the HTTP
/// attempt, and eventually purged by retention cleanup. They are never
/// deleted when their subscription is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: AttemptId,

    /// Chain identifier shared by every attempt for the same event
    /// occurrence and subscription.
    pub delivery_id: DeliveryId,

    pub subscription_id: SubscriptionId,

    pub event_type: EventType,

    /// The exact body sent. Retries re-send this snapshot verbatim.
    pub payload_snapshot: String,

    /// 1-based, strictly increasing within a chain.
    pub attempt_number: u32,

    pub status: AttemptStatus,

    pub http_status: Option<u16>,

    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Set only on `Failed` rows with retry budget remaining; cleared
    /// once the retry it announced has been issued.
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// How the dispatcher runs first delivery attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// `dispatch` awaits every delivery outcome.
    Sync,
    /// `dispatch` returns once deliveries are initiated; attempts run
    /// on the runtime behind a concurrency bound.
    #[default]
    Async,
}

/// Per-subscription result of a dispatch call.
#[derive(Debug)]
pub struct DispatchResult {
    pub subscription_id: SubscriptionId,
    pub outcome: DispatchOutcome,
}

/// What happened to one selected subscription during dispatch.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Synchronous mode: the finished first attempt.
    Completed(DeliveryAttempt),
    /// Asynchronous mode: the first attempt was started.
    Enqueued { delivery_id: DeliveryId },
    /// The attempt could not be started or recorded. Captured here so
    /// the triggering domain action never fails over a webhook.
    Aborted(crate::error::DeliveryError),
}
