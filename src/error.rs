use std::fmt;

use crate::types::{AttemptId, SubscriptionId};

/// Errors surfaced by registry CRUD operations.
///
/// These propagate synchronously to the caller (typically an admin
/// action) and abort the operation; nothing is persisted on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Malformed subscription data, rejected before persistence.
    Validation(String),

    /// No subscription with the given id.
    NotFound(SubscriptionId),

    /// Backend I/O failure.
    Storage(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Validation(reason) =>
                write!(f, "invalid subscription: {}", reason),
            RegistryError::NotFound(id) =>
                write!(f, "subscription not found: {}", id),
            RegistryError::Storage(reason) =>
                write!(f, "registry storage error: {}", reason),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Why a single HTTP delivery attempt failed.
///
/// Delivery-time errors never propagate as errors to the dispatcher or
/// the original event trigger; they are classified here and persisted
/// on the attempt row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transport-level failure: DNS, connection refused, timeout.
    /// Retryable up to the subscription's retry budget.
    Network(String),

    /// Destination responded with a non-2xx status.
    Http { status: u16 },

    /// Signing secret misconfigured; the attempt is aborted before
    /// sending and logged terminal, since resending cannot succeed.
    Signature(String),

    /// Subscription failed the defensive re-check at delivery time.
    Validation(String),

    /// Delivery log backend failure.
    Storage(String),
}

impl DeliveryError {
    /// Whether the retry policy applies to this failure.
    pub fn is_retryable(&self, retry_client_errors: bool) -> bool {
        match self {
            DeliveryError::Network(_) => true,
            DeliveryError::Http { status } => {
                retry_client_errors || !(400..500).contains(status)
            }
            DeliveryError::Signature(_)
            | DeliveryError::Validation(_)
            | DeliveryError::Storage(_) => false,
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Network(reason) =>
                write!(f, "network error: {}", reason),
            DeliveryError::Http { status } =>
                write!(f, "destination returned HTTP {}", status),
            DeliveryError::Signature(reason) =>
                write!(f, "signature error: {}", reason),
            DeliveryError::Validation(reason) =>
                write!(f, "invalid subscription at delivery time: {}", reason),
            DeliveryError::Storage(reason) =>
                write!(f, "delivery log storage error: {}", reason),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Errors surfaced by manual or scheduled retry requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// No attempt row with the given id.
    NotFound(AttemptId),

    /// The chain already ended in success or exhaustion, or this row's
    /// retry was already issued.
    AlreadyTerminal(AttemptId),

    /// The attempt's subscription no longer exists.
    SubscriptionGone(SubscriptionId),

    /// Backend I/O failure.
    Storage(String),
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::NotFound(id) =>
                write!(f, "delivery attempt not found: {}", id),
            RetryError::AlreadyTerminal(id) =>
                write!(f, "delivery attempt already terminal: {}", id),
            RetryError::SubscriptionGone(id) =>
                write!(f, "subscription no longer exists: {}", id),
            RetryError::Storage(reason) =>
                write!(f, "retry storage error: {}", reason),
        }
    }
}

impl std::error::Error for RetryError {}

/// Errors surfaced by the delivery log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// No attempt row with the given id.
    NotFound(AttemptId),

    /// Backend I/O failure.
    Storage(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::NotFound(id) =>
                write!(f, "delivery attempt not found: {}", id),
            LogError::Storage(reason) =>
                write!(f, "delivery log storage error: {}", reason),
        }
    }
}

impl std::error::Error for LogError {}

impl From<LogError> for DeliveryError {
    fn from(err: LogError) -> Self {
        DeliveryError::Storage(err.to_string())
    }
}
