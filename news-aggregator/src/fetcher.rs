use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::rate_limiter::RateLimiter;
use crate::source_config::RateLimitConfig;
use crate::types::{AggregatorError, FetchConfig, Result};

/// HTTP access for one source: a shared client configuration, the source's own
/// rate limiter and its retry policy.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    retry_seed: Duration,
    limiter: RateLimiter,
}

impl Fetcher {
    pub fn new(config: FetchConfig, rate_limit: &RateLimitConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            retry_seed: Duration::from_secs(rate_limit.retry_after),
            limiter: RateLimiter::from_config(rate_limit),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        self.execute(url, |client| client.get(url)).await
    }

    /// Run the request built by `build` under the rate limiter and retry policy,
    /// returning the body text. `build` is called again for every attempt.
    pub async fn execute<F>(&self, url: &str, build: F) -> Result<String>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let started = tokio::time::Instant::now();
        let build = &build;
        let body = with_retry(url, self.retry_seed, self.config.max_retries, || async move {
            self.limiter.acquire().await;
            let response = build(&self.client).send().await?;
            let response = classify(url, response)?;
            self.read_body(url, response).await
        })
        .await?;

        info!(
            "Fetched {} ({} bytes in {:?})",
            url,
            body.len(),
            started.elapsed()
        );
        Ok(body)
    }

    pub async fn execute_json<T, F>(&self, url: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let body = self.execute(url, build).await?;
        serde_json::from_str(&body)
            .map_err(|e| AggregatorError::Parse(format!("invalid JSON from {}: {}", url, e)))
    }

    async fn read_body(&self, url: &str, response: Response) -> Result<String> {
        let limit = self.config.max_body_mb * 1024 * 1024;
        if let Some(length) = response.content_length() {
            if length as usize > limit {
                return Err(AggregatorError::BodyTooLarge {
                    url: url.to_string(),
                    limit_mb: self.config.max_body_mb,
                });
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() > limit {
            return Err(AggregatorError::BodyTooLarge {
                url: url.to_string(),
                limit_mb: self.config.max_body_mb,
            });
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Map a response status onto the retry taxonomy.
fn classify(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AggregatorError::Auth {
            url: url.to_string(),
            status: status.as_u16(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(AggregatorError::TransientFetch {
            url: url.to_string(),
            reason: "rate limited by server (429)".to_string(),
            retry_after: retry_after_header(&response),
        }),
        s if s.is_server_error() => Err(AggregatorError::TransientFetch {
            url: url.to_string(),
            reason: format!("server error {}", s.as_u16()),
            retry_after: retry_after_header(&response),
        }),
        s => Err(AggregatorError::HttpStatus {
            url: url.to_string(),
            status: s.as_u16(),
        }),
    }
}

/// `Retry-After` as delta seconds or an HTTP date.
fn retry_after_header(response: &Response) -> Option<Duration> {
    let value = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    parse_retry_after(value, Utc::now())
}

pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}

/// Exponential schedule seeded by the source's `retry_after`: seed, 2x, 4x,
/// then held at 8x.
pub fn retry_backoff(seed: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: seed,
        initial_interval: seed,
        max_interval: seed * 8,
        multiplier: 2.0,
        randomization_factor: 0.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Longest a single fetch can take when every attempt times out and every
/// retry waits its full scheduled delay. Server `Retry-After` hints can still
/// stretch it.
pub fn worst_case_fetch_time(config: &FetchConfig, rate_limit: &RateLimitConfig) -> Duration {
    let mut backoff = retry_backoff(Duration::from_secs(rate_limit.retry_after));
    let waits: Duration = (0..config.max_retries)
        .filter_map(|_| backoff.next_backoff())
        .sum();
    waits + Duration::from_secs(config.timeout_seconds) * (config.max_retries + 1)
}

/// Retry `op` on retryable errors, at most `max_retries` times after the first
/// attempt. Terminal errors (auth, other 4xx, parse) return immediately.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    seed: Duration,
    max_retries: u32,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = retry_backoff(seed);
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let scheduled = backoff.next_backoff().unwrap_or(seed * 8);
                let delay = match e.retry_after() {
                    Some(server) if server > scheduled => server,
                    _ => scheduled,
                };
                attempt += 1;
                warn!(
                    "Attempt {} for {} failed: {}; retrying in {:?}",
                    attempt, label, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Giving up on {} after {} attempts: {}", label, attempt + 1, e);
                } else {
                    debug!("Not retrying {}: {}", label, e);
                }
                return Err(e);
            }
        }
    }
}
