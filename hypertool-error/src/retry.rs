use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ProxyError;

/// Exponential backoff with jitter:
/// `delay = baseDelayMs * backoffMultiplier ^ (attempt-1)`, optionally
/// multiplied by a uniform random factor in `[0.5, 1.5]`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            jitter: true,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64) * exp;
        let millis = millis.min(self.max_delay.as_millis() as f64);
        let millis = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            millis * factor
        } else {
            millis
        };
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Runs `op` up to `max_attempts` times, sleeping between attempts per
    /// [`Self::delay_for_attempt`]. Only errors whose
    /// [`ProxyError::retryable`] is `true` are retried; any other error (or
    /// the final attempt's error) is returned immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProxyError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProxyError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        "retrying after error: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);
        let d3 = policy.delay_for_attempt(3);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(400));
        assert_eq!(d3, Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            jitter: false,
            max_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_retryable_errors_up_to_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            jitter: false,
            base_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), ProxyError> = policy
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProxyError::connection("transient")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), ProxyError> = policy
            .run(|_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProxyError::Validation("bad input".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_succeeds_on_second_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            jitter: false,
            base_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProxyError::connection("first try fails"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap_or(0), 2);
    }
}
