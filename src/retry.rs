//! Retry with exponential backoff
//!
//! Used for lead persistence and for reconnecting the ARI event stream.

use std::future::Future;
use std::time::{Duration, SystemTime};

/// How often and how patiently a failed operation is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting between attempts
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Whether an HTTP status is worth retrying (rate limits and server errors)
#[must_use]
pub fn is_recoverable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Compute the delay before the next retry attempt.
///
/// Follows `min(base_delay * 2^attempt + jitter, max_delay)`. Jitter is
/// 0-25% of the computed delay, derived from `SystemTime` to avoid pulling
/// in a full random number generator.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let base = base.min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

/// Run `op` until it succeeds or the policy's retries are exhausted
///
/// Returns the last error when every attempt fails.
///
/// # Errors
///
/// Propagates the final attempt's error
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                let delay = delay_for_attempt(policy, attempt);
                tracing::warn!(
                    what,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
