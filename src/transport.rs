use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::types::HttpMethod;

/// One fully-built outgoing HTTP request, ready to send.
///
/// The delivery service owns envelope construction and signing; the
/// transport only moves bytes and reports what the wire did.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Header name/value pairs, signature and content type included.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
    pub verify_ssl: bool,
}

/// What the destination answered. Any received status is a response;
/// classification into success/failure happens in the delivery service.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
}

/// Transport-level failure: the request produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Network(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "request timed out"),
            TransportError::Network(reason) => write!(f, "network error: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// Seam between delivery logic and the HTTP stack.
///
/// Production uses [`ReqwestTransport`]; tests script responses
/// without touching a network.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest)
        -> Result<TransportResponse, TransportError>;
}

/// Reqwest-backed transport with connection pooling.
///
/// Two clients are kept: the default verifying one and a
/// certificate-ignoring one for subscriptions with `verify_ssl` off.
#[cfg(feature = "http")]
pub struct ReqwestTransport {
    verifying: reqwest::Client,
    insecure: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestTransport {
    pub fn new(user_agent: Option<&str>) -> Self {
        let builder = || {
            let mut b = reqwest::Client::builder();
            if let Some(ua) = user_agent {
                b = b.user_agent(ua);
            }
            b
        };

        let verifying = builder().build().expect("failed to create HTTP client");
        let insecure = builder()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to create HTTP client");

        Self { verifying, insecure }
    }

    fn client_for(&self, verify_ssl: bool) -> &reqwest::Client {
        if verify_ssl {
            &self.verifying
        } else {
            &self.insecure
        }
    }
}

#[cfg(feature = "http")]
impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl DeliveryTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: &OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self
            .client_for(request.verify_ssl)
            .request(method, request.url.as_str())
            .timeout(request.timeout)
            .body(request.body.clone());

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        match builder.send().await {
            Ok(response) => Ok(TransportResponse {
                status: response.status().as_u16(),
            }),
            Err(err) => {
                if err.is_timeout() {
                    Err(TransportError::Timeout)
                } else {
                    Err(TransportError::Network(err.to_string()))
                }
            }
        }
    }
}
