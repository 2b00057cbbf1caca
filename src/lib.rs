//! An embedded webhook dispatch and delivery engine.
//!
//! This crate maps internal domain events (bookings, payments,
//! customers) to externally registered HTTP callbacks, signs the
//! payloads, delivers them, and retries failures from a persisted
//! delivery log with exponential backoff.
//!
//! ## Guarantees
//! - Every attempt is persisted before its outcome is known
//! - Attempts within a retry chain are strictly sequential
//! - Bounded delivery concurrency per dispatcher
//! - A failing webhook never fails the triggering domain action
//!
//! ## Non-Guarantees
//! - Exactly-once delivery (subscribers must tolerate replays)
//! - Trigger deduplication (the caller dispatches once per occurrence)
//! - Distributed coordination between engine instances
//!
//! The registry and delivery log default to in-memory stores;
//! Postgres and Redis backends are available behind features.

mod delivery;
mod dispatcher;
mod error;
mod filter;
mod log;
mod registry;
mod scheduler;
mod signing;
mod transport;
mod types;

#[cfg(feature = "redis")]
mod store_redis;

#[cfg(feature = "postgres")]
mod store_postgres;

pub use delivery::{DeliveryConfig, DeliveryService};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DeliveryError, LogError, RegistryError, RetryError};
pub use filter::{Condition, ConditionOp};
pub use log::{DeliveryLog, InMemoryDeliveryLog};
pub use registry::{InMemoryRegistry, Registry};
pub use scheduler::{RetryScheduler, SchedulerConfig};
pub use signing::{header_value, parse_header_value, sign, verify, SignatureAlgorithm};
pub use transport::{
    DeliveryTransport, OutboundRequest, TransportError, TransportResponse,
};
pub use types::{
    AttemptId, AttemptStatus, DeliveryAttempt, DeliveryId, DeliveryMode, DispatchOutcome,
    DispatchResult, Event, EventType, HttpMethod, Subscription, SubscriptionId,
    SubscriptionStatus, UnknownEventType,
};

#[cfg(feature = "http")]
pub use transport::ReqwestTransport;

#[cfg(feature = "redis")]
pub use store_redis::RedisStore;

#[cfg(feature = "postgres")]
pub use store_postgres::PostgresStore;
