// Retry policy shared by the manifest resolver and the throughput sampler.

use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ProbeError;
use crate::config::ProbeConfig;

/// How often, and how patiently, a transient failure is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Pause before the first retry; doubled for each later one
    pub base_delay: Duration,
    /// Upper bound for any pause. Set it to `base_delay` for a fixed pause.
    pub max_delay: Duration,
    /// Spread retries by up to half of `base_delay`
    pub jitter: bool,
}

impl RetryPolicy {
    /// Same pause before every retry.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            jitter: false,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::fixed(config.retries, config.retry_delay)
    }

    /// Pause after the failed attempt number `attempt` (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self
            .base_delay
            .saturating_mul(factor)
            .min(self.max_delay);
        if !self.jitter {
            return delay;
        }

        let headroom = self.max_delay.saturating_sub(delay).min(self.base_delay / 2);
        if headroom.is_zero() {
            return delay;
        }
        let spread = rand::rng().random_range(0.0..1.0);
        delay + headroom.mul_f64(spread)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(0, Duration::from_millis(500))
    }
}

/// Runs `operation` until it succeeds, fails for good, or the policy runs out.
///
/// Only errors accepted by [`ProbeError::is_retryable`] are retried. The
/// closure gets the 0-indexed attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, ProbeError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, ProbeError>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        debug!(
            retry = attempt + 1,
            of = policy.max_retries,
            wait_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
        if token.run_until_cancelled(tokio::time::sleep(delay)).await.is_none() {
            return Err(ProbeError::Cancelled);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> ProbeError {
        ProbeError::http_status(StatusCode::SERVICE_UNAVAILABLE, "http://a/", "sample")
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(200));
    }

    #[test]
    fn doubling_stops_at_the_cap() {
        let policy = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: true,
        };
        assert!(policy.delay_for_attempt(0) < Duration::from_millis(151));
        assert_eq!(policy.delay_for_attempt(35), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let policy = RetryPolicy::fixed(0, Duration::from_millis(1));
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy, &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Err(server_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retryable_errors_use_the_budget() {
        let policy = RetryPolicy::fixed(1, Duration::from_millis(1));
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, &token, |attempt| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt == 0 {
                    Err(server_error())
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn final_errors_are_not_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&policy, &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async {
                Err(ProbeError::http_status(
                    StatusCode::NOT_FOUND,
                    "http://a/",
                    "sample",
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<u32, _> = retry_with_backoff(&policy, &token, |_| async { Ok(1) }).await;
        assert!(matches!(result, Err(ProbeError::Cancelled)));
    }
}
