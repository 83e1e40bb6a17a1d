//! Bounded exponential backoff for retryable units of work.
//!
//! The conversation host promises activities an at-most-N-attempts retry
//! envelope: fixed initial backoff, multiplicative growth, a small cap on the
//! wait, and a finite attempt count. Exhaustion returns the last error to the
//! caller, which escalates it as a runner failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub backoff_coefficient: f64,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_backoff: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given 1-based failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = self.backoff_coefficient.max(1.0).powi(exponent as i32);
        let raw = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(raw).min(self.max_backoff)
    }
}

/// Drives `op` until it succeeds or the policy's attempt budget is exhausted.
/// The closure receives the 1-based attempt number.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt >= max_attempts => {
                tracing::warn!(
                    event_name = "retry.exhausted",
                    attempt,
                    max_attempts,
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(error);
            }
            Err(error) => {
                let backoff = policy.backoff_for(attempt);
                tracing::debug!(
                    event_name = "retry.backoff",
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
