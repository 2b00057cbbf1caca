use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::delivery::DeliveryService;
use crate::error::RegistryError;
use crate::filter::matches_all;
use crate::registry::Registry;
use crate::types::{DeliveryId, DeliveryMode, DispatchOutcome, DispatchResult, Event};

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

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Whether `dispatch` waits for delivery outcomes or only for
    /// initiation.
    pub mode: DeliveryMode,

    /// Bound on concurrently running asynchronous deliveries. A slow
    /// subscriber can hold at most this many slots; fan-out for
    /// further events waits rather than piling up unbounded work.
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let max_in_flight = std::thread::available_parallelism()
            .map(|n| n.get() * 4)
            .unwrap_or(16);

        Self {
            mode: DeliveryMode::Async,
            max_in_flight,
        }
    }
}

/// Resolves which subscriptions care about an event and initiates
/// delivery to each.
///
/// The dispatcher is invoked exactly once per domain occurrence by the
/// host application; trigger deduplication is the caller's concern.
/// Delivery failures never reach the caller: they are recorded in the
/// delivery log and retried from there.
pub struct Dispatcher {
    registry: Arc<dyn Registry>,
    delivery: Arc<DeliveryService>,
    in_flight: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn Registry>,
        delivery: Arc<DeliveryService>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            delivery,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            config,
        }
    }

    /// Fan an event out to every matching active subscription.
    ///
    /// Subscriptions whose conditions reject the payload are skipped
    /// without a log row: they were never selected. In async mode the
    /// returned results carry chain ids for attempts that are still
    /// running; in sync mode they carry the finished first attempts.
    pub async fn dispatch(&self, event: Event) -> Result<Vec<DispatchResult>, RegistryError> {
        let subscriptions = self
            .registry
            .find_active_for_event(event.event_type)
            .await?;

        let mut results = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            if !matches_all(&subscription.conditions, &event.payload) {
                metric_inc("webhook.dispatch.skipped_condition");
                trace_event("webhook.dispatch.skipped_condition");
                continue;
            }

            metric_inc("webhook.dispatch.matched");

            let outcome = match self.config.mode {
                DeliveryMode::Sync => match self.delivery.deliver(&subscription, &event).await {
                    Ok(attempt) => DispatchOutcome::Completed(attempt),
                    Err(err) => {
                        metric_inc("webhook.dispatch.aborted");
                        DispatchOutcome::Aborted(err)
                    }
                },
                DeliveryMode::Async => {
                    let permit = match self.in_flight.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            metric_inc("webhook.dispatch.aborted");
                            results.push(DispatchResult {
                                subscription_id: subscription.id,
                                outcome: DispatchOutcome::Aborted(
                                    crate::error::DeliveryError::Storage(
                                        "dispatcher concurrency limiter closed".to_string(),
                                    ),
                                ),
                            });
                            continue;
                        }
                    };

                    let delivery_id = DeliveryId::generate();
                    let delivery = self.delivery.clone();
                    let event = event.clone();
                    let subscription_id = subscription.id;

                    tokio::spawn(async move {
                        let _permit = permit;
                        if delivery
                            .deliver_with_id(&subscription, &event, delivery_id)
                            .await
                            .is_err()
                        {
                            trace_event("webhook.delivery.abort");
                        }
                    });

                    metric_inc("webhook.dispatch.enqueued");
                    results.push(DispatchResult {
                        subscription_id,
                        outcome: DispatchOutcome::Enqueued { delivery_id },
                    });
                    continue;
                }
            };

            results.push(DispatchResult {
                subscription_id: subscription.id,
                outcome,
            });
        }

        trace_event("webhook.dispatch.completed");
        Ok(results)
    }
}
