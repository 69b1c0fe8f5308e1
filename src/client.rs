#![doc = "Elasticsearch transport: the mockable `EsTransport` trait and its reqwest-backed client."]
//
//! # Transport contract
//!
//! The orchestrator only ever talks to Elasticsearch through [`EsTransport`]. Paths are
//! relative to the cluster URL the implementor was built with (e.g. `/_snapshot/backups`).
//!
//! - Every response that reaches us, whatever its status, comes back as an [`HttpResult`].
//! - [`TransportError`] means no response was received, even after retrying.
//!
//! ## Retries
//! [`EsClient`] retries connection failures and timeouts with exponential backoff, up to
//! [`ClientSettings::max_attempts`]. It never retries a received 4xx/5xx: snapshot creation
//! is not idempotent and a second attempt could race the first one server-side.
//!
//! ## Mocking
//! The trait is annotated for `mockall`; `MockEsTransport` is exported under the default
//! `test-export-mocks` feature for integration tests.

use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;

use crate::template::RequestPayload;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Status and raw body of a response actually received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResult {
    pub status_code: u16,
    pub body: String,
}

impl HttpResult {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Body parsed as JSON, or `None` if it is not valid JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport failure after {attempts} attempt(s): {cause}")]
pub struct TransportError {
    pub cause: String,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every attempt after that.
    pub initial_backoff: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

/// The calls the snapshot workflow makes against a cluster.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait EsTransport: Send + Sync {
    /// `PUT {cluster}{path}` with a JSON body.
    async fn put(&self, path: &str, payload: RequestPayload) -> Result<HttpResult, TransportError>;

    /// `GET {cluster}{path}`.
    async fn get(&self, path: &str) -> Result<HttpResult, TransportError>;

    /// `POST {cluster}{path}`, with an optional JSON body.
    async fn post(
        &self,
        path: &str,
        payload: Option<RequestPayload>,
    ) -> Result<HttpResult, TransportError>;
}

pub struct EsClient {
    http: reqwest::Client,
    base_url: String,
    settings: ClientSettings,
}

impl EsClient {
    pub fn new(base_url: &str, settings: ClientSettings) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| TransportError {
                cause: format!("failed to build HTTP client: {e}"),
                attempts: 0,
            })?;
        tracing::info!(
            base_url,
            timeout_ms = settings.timeout.as_millis() as u64,
            max_attempts = settings.max_attempts,
            "Initialized EsClient"
        );
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResult, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.settings.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(CONTENT_TYPE, "application/json");
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    let body = response.text().await.map_err(|e| {
                        tracing::error!(error = ?e, %url, status_code, "Failed to read response body");
                        TransportError {
                            cause: format!("failed to read response body: {e}"),
                            attempts: attempt,
                        }
                    })?;
                    tracing::debug!(%method, %url, status_code, attempt, "Received response");
                    return Ok(HttpResult { status_code, body });
                }
                Err(e) if is_retryable(&e) && attempt < max_attempts => {
                    tracing::warn!(
                        error = %e,
                        %method,
                        %url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Request failed before a response arrived, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    tracing::error!(error = %e, %method, %url, attempt, "Request failed");
                    return Err(TransportError {
                        cause: e.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

/// Failures where the server never answered.
fn is_retryable(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

#[async_trait]
impl EsTransport for EsClient {
    async fn put(&self, path: &str, payload: RequestPayload) -> Result<HttpResult, TransportError> {
        self.send(Method::PUT, path, Some(payload.to_bytes())).await
    }

    async fn get(&self, path: &str) -> Result<HttpResult, TransportError> {
        self.send(Method::GET, path, None).await
    }

    async fn post(
        &self,
        path: &str,
        payload: Option<RequestPayload>,
    ) -> Result<HttpResult, TransportError> {
        self.send(Method::POST, path, payload.map(|p| p.to_bytes()))
            .await
    }
}
