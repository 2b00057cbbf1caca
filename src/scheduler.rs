use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::delivery::DeliveryService;

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
pub struct SchedulerConfig {
    /// How often due retries are processed.
    pub poll_interval: Duration,

    /// How often retention cleanup runs; `None` disables cleanup.
    pub cleanup_interval: Option<Duration>,

    /// Age after which delivery log rows are purged.
    pub retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            cleanup_interval: Some(Duration::from_secs(60 * 60)),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Owns the clock for retry processing.
///
/// A timer task calls `process_pending_retries` on a fixed interval,
/// independent of any external traffic, and optionally purges log rows
/// past the retention window. One failing pass never stops the loop.
pub struct RetryScheduler {
    is_running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn start(delivery: Arc<DeliveryService>, config: SchedulerConfig) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let task_running = is_running.clone();
        let task_shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut poll = interval(config.poll_interval.max(Duration::from_millis(10)));
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut cleanup = interval(
                config
                    .cleanup_interval
                    .unwrap_or(Duration::from_secs(24 * 60 * 60)),
            );
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            cleanup.tick().await;

            loop {
                tokio::select! {
                    _ = task_shutdown.notified() => break,
                    _ = poll.tick() => {
                        match delivery.process_pending_retries().await {
                            Ok(processed) if processed > 0 => {
                                metric_inc("webhook.scheduler.retries_processed");
                                trace_event("webhook.scheduler.retries_processed");
                            }
                            Ok(_) => {}
                            Err(_) => {
                                metric_inc("webhook.scheduler.poll_error");
                                trace_event("webhook.scheduler.poll_error");
                            }
                        }
                    }
                    _ = cleanup.tick() => {
                        if config.cleanup_interval.is_some() {
                            match delivery.log().cleanup(config.retention).await {
                                Ok(_) => metric_inc("webhook.scheduler.cleanup"),
                                Err(_) => {
                                    metric_inc("webhook.scheduler.cleanup_error");
                                    trace_event("webhook.scheduler.cleanup_error");
                                }
                            }
                        }
                    }
                }

                if !task_running.load(Ordering::SeqCst) {
                    break;
                }
            }
        });

        Self {
            is_running,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop the timer task and wait for the in-flight pass to finish.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
