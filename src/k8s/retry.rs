//! Retry-on-conflict policy for read-modify-write cycles
//!
//! The policy is plain data so it can be built from configuration and driven
//! against any store, real or simulated.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::KubeError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `initial * factor^(n-1)` before retry `n`, capped at `max`
    Exponential {
        initial: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => {
                let exp = attempt.saturating_sub(1).min(32) as i32;
                let scaled = initial.as_secs_f64() * factor.powi(exp);
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// Maximum attempts plus the backoff between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// A policy always allows at least one attempt.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    /// Five attempts, 10ms apart.
    fn default() -> Self {
        Self::new(5, Backoff::Fixed(Duration::from_millis(10)))
    }
}

/// Outcome of a retry loop that did not succeed.
#[derive(Debug)]
pub enum RetryError {
    /// A non-conflict error stopped the loop.
    Fatal(KubeError),
    /// Every attempt ended in a conflict.
    Exhausted { attempts: u32, last: KubeError },
}

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or the policy runs out of attempts.
///
/// `op` receives the 1-based attempt number. Each invocation must perform
/// its own read so that no write reuses a version token from another attempt.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, KubeError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                let delay = policy.delay_after(attempt);
                debug!(attempt, ?delay, error = %e, "Write conflicted, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(RetryError::Fatal(e)),
        }
    }
}
