//! HTTP mocking utilities for hook delivery tests.

use std::time::Duration;

use bytes::Bytes;
use ::http::StatusCode;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// How a mocked hook answers.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Answer immediately with `status`.
    Status(StatusCode),
    /// Answer with `status` after `delay`.
    Delayed {
        /// Response status
        status: StatusCode,
        /// Delay before answering
        delay: Duration,
    },
}

/// Wiremock server hosting any number of hook paths.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full URL for a hook mounted at `hook_path`.
    pub fn hook_url(&self, hook_path: &str) -> String {
        format!("{}{hook_path}", self.server.uri())
    }

    /// Mounts a POST handler at `hook_path`.
    pub async fn mock_hook(&self, hook_path: &str, response: MockResponse) {
        let template = match response {
            MockResponse::Status(status) => ResponseTemplate::new(status.as_u16()),
            MockResponse::Delayed { status, delay } => {
                ResponseTemplate::new(status.as_u16()).set_delay(delay)
            },
        };

        Mock::given(method("POST"))
            .and(path(hook_path))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Bodies POSTed to `hook_path`, in arrival order.
    pub async fn received_bodies(&self, hook_path: &str) -> Vec<Bytes> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == hook_path)
            .map(|request| Bytes::from(request.body))
            .collect()
    }

    /// Paths of every request received, in arrival order.
    pub async fn received_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.received_paths().await.len();
        assert_eq!(received, expected, "expected {expected} requests, received {received}");
    }
}
