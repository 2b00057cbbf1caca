#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use webhook_courier::{
    DeliveryConfig, DeliveryService, DeliveryTransport, EventType, InMemoryDeliveryLog,
    InMemoryRegistry, OutboundRequest, Subscription, TransportError, TransportResponse,
};

/// Scripted transport: plays back a response sequence, then a fallback,
/// and records every request it saw.
pub struct MockTransport {
    script: Mutex<VecDeque<Result<u16, TransportError>>>,
    fallback: Result<u16, TransportError>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl MockTransport {
    pub fn always_status(status: u16) -> Arc<Self> {
        Self::sequence(Vec::new(), Ok(status))
    }

    pub fn always_error(err: TransportError) -> Arc<Self> {
        Self::sequence(Vec::new(), Err(err))
    }

    pub fn sequence(
        script: Vec<Result<u16, TransportError>>,
        fallback: Result<u16, TransportError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn sent(&self) -> Vec<OutboundRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn execute(
        &self,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().await.push(request.clone());
        let next = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map(|status| TransportResponse { status })
    }
}

/// Fully wired in-memory engine around a mock transport.
pub struct Harness {
    pub registry: Arc<InMemoryRegistry>,
    pub log: Arc<InMemoryDeliveryLog>,
    pub service: Arc<DeliveryService>,
    pub transport: Arc<MockTransport>,
}

pub fn harness(transport: Arc<MockTransport>) -> Harness {
    harness_with_config(transport, DeliveryConfig::default())
}

pub fn harness_with_config(transport: Arc<MockTransport>, config: DeliveryConfig) -> Harness {
    let registry = Arc::new(InMemoryRegistry::new());
    let log = Arc::new(InMemoryDeliveryLog::new());
    let service = Arc::new(DeliveryService::new(
        registry.clone(),
        log.clone(),
        transport.clone(),
        config,
    ));

    Harness {
        registry,
        log,
        service,
        transport,
    }
}

/// A valid subscription for the given events with fast-retry defaults
/// suitable for tests.
pub fn subscription(events: impl IntoIterator<Item = EventType>) -> Subscription {
    let url = Url::parse("https://example.com/hook").expect("static url");
    Subscription::new("test hook", url)
        .with_events(events)
        .with_timeout(Duration::from_secs(5))
        .with_retry_policy(3, Duration::ZERO)
}
