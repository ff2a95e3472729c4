//! Rate limiting and retry logic for debrid API calls
//!
//! Every adapter talks to its vendor through a [`ProviderClient`]: a reqwest
//! client behind a per-provider governor limiter that also maps HTTP and
//! transport failures onto [`DebridError`].

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{DebridError, Result};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

impl RateLimitConfig {
    /// Real-Debrid allows 250 requests per minute
    pub fn for_realdebrid() -> Self {
        Self {
            requests_per_second: 4,
            burst_size: 8,
        }
    }

    /// AllDebrid allows 12 requests per second
    pub fn for_alldebrid() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 10,
        }
    }

    /// TorBox has no published limits, stay conservative
    pub fn for_torbox() -> Self {
        Self {
            requests_per_second: 5,
            burst_size: 5,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_interval: Duration,
    /// Maximum backoff duration
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        }
    }
}

/// Execute an async operation, retrying transient failures only
pub async fn retry_async<T, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempts >= config.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let Some(duration) = backoff.next_backoff() else {
                    return Err(e);
                };
                warn!(
                    operation = %operation_name,
                    attempt = attempts,
                    error = %e,
                    retry_in_ms = duration.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(duration).await;
            }
        }
    }
}

/// Helper trait for classifying HTTP responses
pub trait ResponseExt {
    /// Check if the response indicates rate limiting (429)
    fn is_rate_limited(&self) -> bool;

    /// Check if the response indicates a transient error that should be retried
    fn is_transient_error(&self) -> bool;

    /// 401 or 403
    fn is_auth_error(&self) -> bool;
}

impl ResponseExt for Response {
    fn is_rate_limited(&self) -> bool {
        self.status().as_u16() == 429
    }

    fn is_transient_error(&self) -> bool {
        let status = self.status().as_u16();
        status == 429 || status == 408 || (500..600).contains(&status)
    }

    fn is_auth_error(&self) -> bool {
        matches!(self.status().as_u16(), 401 | 403)
    }
}

/// A rate-limited HTTP client bound to one provider
pub struct ProviderClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    provider: String,
    retry: RetryConfig,
}

impl ProviderClient {
    pub fn new(provider: &str, rate: RateLimitConfig, timeout: Duration) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(rate.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(rate.burst_size).unwrap_or(NonZeroU32::MIN));

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                DebridError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            provider: provider.to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Get a reference to the underlying client for building requests
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }

    /// Send one request.
    ///
    /// Auth failures, transient statuses and transport errors become
    /// errors; any other response is returned for the adapter to decode.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.wait_for_permit().await;

        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out: {e}")
            } else {
                e.to_string()
            };
            DebridError::transport(&self.provider, message)
        })?;

        debug!(
            provider = %self.provider,
            url = %response.url().path(),
            status = response.status().as_u16(),
            "Provider response"
        );

        if response.is_auth_error() {
            return Err(DebridError::Authentication {
                provider: self.provider.clone(),
            });
        }
        if response.is_transient_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DebridError::transport(
                &self.provider,
                format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
            ));
        }

        Ok(response)
    }

    /// Send a request built by `build`, retrying transient failures.
    /// Only for idempotent calls.
    pub async fn send_with_retry<F>(&self, operation: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_async(move || self.send(build()), &self.retry, operation).await
    }

    /// Read the body and decode it as JSON
    pub async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| DebridError::transport(&self.provider, format!("reading body: {e}")))?;
        serde_json::from_str(&body).map_err(|e| {
            DebridError::decode(&self.provider, format!("{e} (body: {})", truncate(&body, 200)))
        })
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_second, 2);
        assert_eq!(config.burst_size, 5);
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_async(
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DebridError::transport("rd", "HTTP 503"))
                } else {
                    Ok(42)
                }
            },
            &fast_retry(),
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry_async(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DebridError::Authentication {
                    provider: "rd".into(),
                })
            },
            &fast_retry(),
            "test",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry_async(
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DebridError::transport("rd", "connection reset"))
            },
            &fast_retry(),
            "test",
        )
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
