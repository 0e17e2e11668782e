//! Bounded retry-with-backoff around a single action.
//!
//! Retry is expressed as a `Result` combinator: the classifier decides
//! retryable-vs-fatal, transient failures sleep an exponentially growing
//! backoff, and exhaustion re-raises as `RetriesExhausted` with the last
//! error preserved. The coordinator never waits for page conditions; that
//! is the wait engine's concern.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use verity_common::error::TestError;

/// Retry parameters plus the failure classifier.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub classifier: fn(&TestError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            classifier: TestError::is_transient,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Inter-attempt delay before attempt `attempt + 1`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .mul_f64(self.backoff_multiplier.powi(attempt as i32 - 1))
    }
}

/// A successful outcome plus how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Retried<T> {
    pub fn was_flaky(&self) -> bool {
        self.attempts > 1
    }
}

/// Run `op` under `policy`, passing it mutable access to `ctx` each
/// attempt.
///
/// Transient failures (per the policy's classifier) are retried with
/// backoff up to `max_attempts`; the final transient failure becomes
/// `RetriesExhausted`. A fatal failure propagates immediately after a
/// single attempt.
pub async fn with_retry<C, T>(
    policy: &RetryPolicy,
    ctx: &mut C,
    mut op: impl for<'a> FnMut(&'a mut C, u32) -> BoxFuture<'a, Result<T, TestError>> + Send,
) -> Result<Retried<T>, TestError>
where
    C: Send + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(&mut *ctx, attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) if !(policy.classifier)(&error) => return Err(error),
            Err(error) if attempt >= max_attempts => {
                return Err(TestError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }
            Err(error) => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, backing off before retry"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_by_multiplier() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }
}
