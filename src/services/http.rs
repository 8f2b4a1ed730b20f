//! Outbound HTTP helpers shared by the feed, Google and scanner clients.

use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};

const USER_AGENT: &str = concat!("studyhub/", env!("CARGO_PKG_VERSION"));

/// Shared client with the configured per-request timeout.
pub fn build_client(config: &Config) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sync.fetch_timeout_seconds))
        .user_agent(USER_AGENT)
        .build()
        .map_err(AppError::Request)
}

/// Bounded exponential backoff for 429 / 5xx answers and network errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send the request built by `make_request`, retrying transient failures.
///
/// Any other status (including 401/404) is returned to the caller as-is.
pub async fn send_with_backoff<F>(
    policy: RetryPolicy,
    service: &str,
    make_request: F,
) -> AppResult<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;

    for attempt in 1..=attempts {
        match make_request().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status != reqwest::StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                    return Ok(resp);
                }

                if attempt == attempts {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(AppError::Upstream(format!(
                        "{} answered {} after {} attempts: {}",
                        service,
                        status,
                        attempt,
                        truncate(&body, 200)
                    )));
                }

                let wait = retry_after(&resp)
                    .unwrap_or(backoff)
                    .min(policy.max_backoff);
                tracing::warn!(
                    "Transient {} error (status: {}). Retrying in {:?} (attempt {}/{})",
                    service,
                    status,
                    wait,
                    attempt,
                    attempts
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                if attempt == attempts {
                    return Err(AppError::Request(e));
                }
                tracing::warn!(
                    "{} request failed: {}. Retrying in {:?} (attempt {}/{})",
                    service,
                    e,
                    backoff,
                    attempt,
                    attempts
                );
                tokio::time::sleep(backoff).await;
            }
        }
        backoff = (backoff * 2).min(policy.max_backoff);
    }

    Err(AppError::Upstream(format!(
        "Exceeded {} retry attempts",
        service
    )))
}

/// Cut `text` to at most `max` characters for log and error messages.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
