use std::future::Future;
use std::time::Duration;

const BASE_BACKOFF_SECS: u64 = 1;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff policy: attempt `n` (1-based) waits `base * 2^(n-1)`
/// before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(BASE_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(30);
        self.base_delay.saturating_mul(1 << shift)
    }
}

/// Run `f` until it succeeds or the policy's attempts are exhausted.
///
/// Only the last error is returned; earlier failures are logged at `warn`.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "{operation} failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
