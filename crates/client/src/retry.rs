// Retry policy for client transports: bounded attempts, exponential backoff,
// and an abort whenever the transmit gate closes between attempts.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::gate::TransmitGate;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const BASE_BACKOFF_MS: u64 = 500;
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Server statuses worth another attempt.
pub const RETRY_STATUS_CODES: &[u16] = &[500, 502, 504];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            retry_statuses: RETRY_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Exponential backoff delay for a given retry number (0-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.min(16); // cap exponent to avoid overflow
        self.base_backoff.saturating_mul(1u32 << exp).min(self.max_backoff)
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

/// Outcome of one attempt as seen by the retry loop.
#[derive(Debug)]
pub enum AttemptError {
    /// Transient: connection failure or a retryable status, with the
    /// server's `Retry-After` hint when it sent one.
    Retryable { error: ClientError, retry_after: Option<Duration> },
    /// Final: surface to the caller immediately.
    Fatal(ClientError),
}

/// Run `attempt` until it succeeds, fails fatally, runs out of retries, or
/// the gate closes. The gate is re-checked after every backoff sleep, right
/// before the next send.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    gate: &TransmitGate,
    mut attempt: F,
) -> Result<T, ClientError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut retry = 0u32;
    loop {
        match attempt(retry).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(error)) => return Err(error),
            Err(AttemptError::Retryable { error, retry_after }) => {
                if retry >= policy.max_retries {
                    warn!(attempts = retry + 1, %error, "giving up after retries");
                    return Err(error);
                }

                let backoff = policy.backoff_delay(retry);
                let delay = retry_after.map_or(backoff, |hinted| hinted.max(backoff));
                debug!(retry, delay_ms = delay.as_millis() as u64, %error, "retrying rpc call");
                tokio::time::sleep(delay).await;

                if !gate.allows() {
                    return Err(ClientError::TransmitDisallowed { attempts: retry + 1 });
                }
                retry += 1;
            }
        }
    }
}

/// Parse a `Retry-After` header value (seconds or HTTP date) into a delay.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0)))
}
