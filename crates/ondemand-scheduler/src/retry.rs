//! Bounded retry with a pluggable backoff.
//!
//! The combinator is independent of any I/O: the operation and the sleep are
//! both supplied by the caller, so tests can record delays instead of waiting.
//!
//! ```ignore
//! let result = retry_with_backoff(
//!     &RetryPolicy::default(),
//!     "run_task",
//!     |attempt| async move { orchestrator.submit_task(&params).await },
//!     tokio::time::sleep,
//! )
//! .await?;
//! ```

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Boxed sleep function, shared by long-lived retrying components.
pub type Sleeper = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sleep on the tokio timer.
pub fn tokio_sleeper() -> Sleeper {
    Arc::new(|delay: Duration| -> BoxFuture<'static, ()> { Box::pin(tokio::time::sleep(delay)) })
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay after failed attempt `n` (1-based) before attempt `n + 1`.
    pub backoff: fn(u32) -> Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::quadratic(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// `n² × 1s` after failed attempt `n`: 1s, 4s, 9s, 16s, ...
    pub fn quadratic(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: quadratic_backoff,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

pub fn quadratic_backoff(attempt: u32) -> Duration {
    let n = u64::from(attempt);
    Duration::from_millis(1000 * n * n)
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// The operation receives the 1-based attempt number. No sleep follows the
/// final failed attempt.
pub async fn retry_with_backoff<F, Fut, T, E, S, SFut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    mut sleep: S,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                sleep(delay).await;
            }
        }
    }
}
