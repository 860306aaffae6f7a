//! HTTP GET with bounded retries and linear backoff.

use crate::util::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// How often and how patiently a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt. Attempt `i` waits `base_delay * (i - 1)`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (1-indexed) attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.saturating_sub(1)
    }
}

/// Whether a response status is worth another attempt.
///
/// Server errors and request timeouts are transient; everything else (4xx) is permanent.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408
}

/// The reason a [fetch_with_retry] call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The last response had a non-success status.
    Status { status: u16, attempts: u32 },
    /// No response could be obtained on the last attempt.
    Transport {
        error: TransportError,
        attempts: u32,
    },
}

impl FetchFailure {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Status { attempts, .. } | Self::Transport { attempts, .. } => *attempts,
        }
    }
}

impl Display for FetchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status { status, attempts } => {
                write!(f, "HTTP status {status} after {attempts} attempt(s)")
            }
            Self::Transport { error, attempts } => {
                write!(f, "{error} after {attempts} attempt(s)")
            }
        }
    }
}

impl std::error::Error for FetchFailure {}

/// Performs a GET request, retrying transient failures according to `policy`.
///
/// Permanent failures (non-retryable status codes) are returned after the first attempt.
pub async fn fetch_with_retry<H: HttpClient + ?Sized>(
    client: &H,
    request: &HttpRequest,
    policy: &RetryPolicy,
) -> Result<HttpResponse, FetchFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let url = request.url.as_str();
    let mut attempt = 1;
    loop {
        let failure = match client.get(request.clone()).await {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) if !is_retryable_status(response.status) => {
                tracing::error!(
                    url,
                    status = response.status,
                    "fetch failed permanently, not retrying"
                );
                return Err(FetchFailure::Status {
                    status: response.status,
                    attempts: attempt,
                });
            }
            Ok(response) => FetchFailure::Status {
                status: response.status,
                attempts: attempt,
            },
            Err(error) => FetchFailure::Transport {
                error,
                attempts: attempt,
            },
        };

        if attempt >= max_attempts {
            tracing::error!(url, "final fetch attempt failed: {failure}");
            return Err(failure);
        }
        attempt += 1;
        let delay = policy.delay_before(attempt);
        tracing::warn!(url, ?delay, "fetch attempt failed ({failure}), retrying");
        tokio::time::sleep(delay).await;
    }
}
