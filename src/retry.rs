//! Bounded retry with exponential backoff
//!
//! One retry helper for every call site that tolerates a short transient
//! failure (fee history, nonce fetch, cache store connect). The quote client
//! does not use it: a failed quote is absorbed by the next scan cycle.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry parameters
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier: 2,
            max_delay: Duration::from_secs(5),
        }
    }

    /// Single attempt, no retry
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
/// Returns the last error when every attempt failed.
pub async fn retry_with_backoff<T, E, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", label, attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                debug!(
                    "{} failed (attempt {}/{}): {} - retrying in {}ms",
                    label,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!("{} failed after {} attempts: {}", label, max_attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_escalates_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
        assert_eq!(policy.delay_after(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<u32, String> = retry_with_backoff("test", policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<(), String> = retry_with_backoff("test", policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
