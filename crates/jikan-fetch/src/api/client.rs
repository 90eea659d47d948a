//! Jikan API client with retry logic.

use super::error::{FailureKind, FetchError};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde_json::Value;
use shared::config::ApiConfig;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Transport for upstream GET requests returning JSON
#[async_trait]
pub trait Upstream: Send + Sync {
    /// GET `endpoint` (relative to the API root) with `query` parameters
    async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, FetchError>;
}

/// Jikan API v4 client
pub struct JikanClient {
    /// HTTP client
    client: Client,
    /// Base URL for Jikan API
    base_url: String,
    /// Per-request timeout
    timeout: Duration,
    /// Maximum retries for transient failures
    max_retries: u32,
    /// Base delay for retry (exponential backoff)
    retry_delay_ms: u64,
}

impl JikanClient {
    /// Create a new Jikan client
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jikan-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            max_retries,
            retry_delay_ms,
        })
    }

    pub fn from_config(config: &ApiConfig) -> anyhow::Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_seconds),
            config.max_retries,
            config.retry_delay_ms,
        )
    }

    /// Upper bound for one `get_json` call: every attempt timing out, plus
    /// the delays between them and a second of slack
    pub fn request_budget(config: &ApiConfig) -> Duration {
        let attempt = Duration::from_secs(config.timeout_seconds);
        let delays = (0..config.max_retries).fold(Duration::ZERO, |total, n| {
            total.saturating_add(retry_delay(config.retry_delay_ms, n))
        });

        attempt
            .saturating_mul(config.max_retries.saturating_add(1))
            .saturating_add(delays)
            .saturating_add(Duration::from_secs(1))
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        retry_delay(self.retry_delay_ms, attempt)
    }

    /// One request, no retries
    async fn attempt(&self, url: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            warn!(url = %url, retry_after = ?retry_after, "Rate limited by server");
            return Err(FetchError::RateLimited);
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), error_message(&body)));
        }

        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn transport_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl Upstream for JikanClient {
    /// GET with retry for transient failures; rate limits and client errors
    /// return immediately
    async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let mut attempt = 0;
        loop {
            debug!(url = %url, attempt = attempt + 1, "Making API request");

            match self.attempt(&url, query).await {
                Ok(value) => {
                    debug!(url = %url, "Request successful");
                    return Ok(value);
                }
                Err(e) if e.kind() == FailureKind::Transient && attempt < self.max_retries => {
                    let delay = self.retry_delay(attempt);
                    warn!(
                        url = %url,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Request failed, retrying after delay"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }
    }
}

/// `base_ms * 2^attempt`
fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

/// Jikan error bodies look like `{"status":404,"type":"BadResponseException","message":"..."}`
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
