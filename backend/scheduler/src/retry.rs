//! Retry engine: bounded exponential backoff for unreliable network calls.
//!
//! No jitter and no state carried between calls; each `with_retry` is its own
//! attempt loop. The wrapped operation enforces its own timeout.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure in milliseconds; doubles per attempt.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self { max_attempts, base_delay_ms, max_delay_ms }
    }

    /// Delay after failed attempt `attempt_number` (1-indexed):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.checked_pow(attempt_number - 1).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is used up.
///
/// The final attempt's error is returned as-is. A policy with
/// `max_attempts == 0` still makes one attempt.
pub async fn with_retry<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !policy.should_retry(attempt) => {
                warn!(label, attempt, error = %e, "Retry policy exhausted");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    max = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
