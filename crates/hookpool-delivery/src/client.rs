//! Outbound HTTP primitive used by the workers.
//!
//! `HttpPoster` is the single network capability the dispatcher depends on:
//! POST a byte payload to a URL within a timeout and report the status or a
//! transport error. `DeliveryClient` implements it on top of a pooled
//! `reqwest::Client`; tests substitute their own implementations.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Bodies of rejected deliveries are cut to this many bytes before logging.
const MAX_LOGGED_BODY_SIZE: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout applied to every delivery attempt.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: default_user_agent(),
            max_redirects: 3,
        }
    }
}

/// User agent sent when none is configured, e.g. `hookpool/0.1.0`.
pub fn default_user_agent() -> String {
    format!("hookpool/{}", env!("CARGO_PKG_VERSION"))
}

/// Outcome of a POST that reached the hook.
///
/// Any status code is returned here, including 4xx and 5xx; classifying the
/// status is the caller's decision.
#[derive(Debug, Clone)]
pub struct PostResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated to 1 KiB.
    pub body: String,
    /// Time from sending the request to reading the body.
    pub duration: Duration,
}

impl PostResponse {
    /// Hooks answering below 400 accepted the delivery.
    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }
}

/// Performs a single outbound HTTP POST.
#[async_trait::async_trait]
pub trait HttpPoster: Send + Sync + 'static {
    /// POSTs `body` to `url`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Timeout` when the timeout elapses and
    /// `DeliveryError::NetworkError` for any other transport failure. HTTP
    /// error statuses are not errors at this level.
    async fn post(&self, url: &str, body: Bytes, timeout: Duration) -> Result<PostResponse>;
}

/// `reqwest`-backed HTTP client for hook delivery.
///
/// Connections are pooled across workers; clone freely.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl HttpPoster for DeliveryClient {
    async fn post(&self, url: &str, body: Bytes, timeout: Duration) -> Result<PostResponse> {
        let start_time = Instant::now();

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e, timeout))?;

        let status_code = response.status().as_u16();

        let body = if status_code >= 400 {
            match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes),
                Err(e) if e.is_timeout() => return Err(DeliveryError::timeout(timeout)),
                Err(e) => format!("[failed to read response body: {e}]"),
            }
        } else {
            String::new()
        };

        let duration = start_time.elapsed();
        tracing::debug!(status = status_code, duration_ms = duration.as_millis(), "received response");

        Ok(PostResponse { status_code, body, duration })
    }
}

fn classify_transport_error(error: &reqwest::Error, timeout: Duration) -> DeliveryError {
    if error.is_timeout() {
        return DeliveryError::timeout(timeout);
    }
    if error.is_connect() {
        return DeliveryError::network(format!("connection failed: {error}"));
    }
    DeliveryError::network(error.to_string())
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_LOGGED_BODY_SIZE {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let suffix = "... (truncated)";
    let max_content = MAX_LOGGED_BODY_SIZE - suffix.len();
    format!("{}{suffix}", String::from_utf8_lossy(&bytes[..max_content]))
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn successful_delivery_posts_raw_payload() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_string(r#"{"a":1}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client
            .post(&format!("{}/hook", mock_server.uri()), Bytes::from(r#"{"a":1}"#), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert!(response.is_success());
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn user_agent_header_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header("user-agent", default_user_agent().as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.post(&mock_server.uri(), Bytes::new(), TIMEOUT).await.unwrap();

        assert_eq!(response.status_code, 204);
    }

    #[tokio::test]
    async fn error_status_is_returned_with_body() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.post(&mock_server.uri(), Bytes::new(), TIMEOUT).await.unwrap();

        assert_eq!(response.status_code, 404);
        assert_eq!(response.body, "Not Found");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let error = client
            .post(&mock_server.uri(), Bytes::new(), Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(error, DeliveryError::Timeout { timeout_ms: 100 }));
    }

    #[tokio::test]
    async fn unreachable_hook_is_network_error() {
        let client = DeliveryClient::with_defaults().unwrap();

        // Port 9 (discard) on loopback is closed in test environments.
        let error = client
            .post("http://127.0.0.1:9/hook", Bytes::new(), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(error, DeliveryError::NetworkError { .. }));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = vec![b'x'; 4096];
        let truncated = truncate_body(&body);

        assert_eq!(truncated.len(), MAX_LOGGED_BODY_SIZE);
        assert!(truncated.ends_with("... (truncated)"));
        assert_eq!(truncate_body(b"short"), "short");
    }
}
