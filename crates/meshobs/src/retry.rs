//! Retry with exponential backoff for mutating cluster calls.
//!
//! Only [`Error::Transient`] is retried. Anything else is returned on the
//! first occurrence, and a transient error that outlives the retry budget
//! escalates to [`Error::Fatal`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::{Error, Result};

/// Longest single delay a retry or wait setting may ask for.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff multipliers must be finite and at least 1.
pub(crate) fn check_multiplier(field: &str, multiplier: f64) -> Result<()> {
    if multiplier.is_finite() && multiplier >= 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidSpec(format!(
            "{field} must be a finite number >= 1, got {multiplier}"
        )))
    }
}

pub(crate) fn check_delay(field: &str, delay: Duration) -> Result<()> {
    if delay > MAX_DELAY {
        return Err(Error::InvalidSpec(format!(
            "{field} must be at most {}s, got {}s",
            MAX_DELAY.as_secs(),
            delay.as_secs()
        )));
    }
    Ok(())
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "crate::config::duration_secs")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "crate::config::duration_secs")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay after a given failed attempt (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(10)).unwrap_or(10);
        let multiplier = self.backoff_multiplier.powi(exp);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Reject settings the backoff arithmetic cannot handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for a multiplier below 1 or not
    /// finite, or a delay above [`MAX_DELAY`].
    pub fn validate(&self) -> Result<()> {
        check_multiplier("retry.backoff_multiplier", self.backoff_multiplier)?;
        check_delay("retry.initial_delay", self.initial_delay)?;
        check_delay("retry.max_delay", self.max_delay)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// A retry that would sleep past `deadline` is not attempted and the call
/// fails with [`Error::Timeout`].
///
/// # Errors
///
/// Returns the first non-transient error, [`Error::Fatal`] once the retry
/// budget is spent, or [`Error::Timeout`] when the deadline expires.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    deadline: Option<Instant>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };
        attempt += 1;

        if !config.should_retry(attempt) {
            error!(
                operation = %operation_name,
                attempt,
                error = %err,
                "Operation failed after max retries"
            );
            return Err(Error::Fatal(format!(
                "{operation_name} failed after {attempt} attempt(s): {err}"
            )));
        }

        let delay = config.delay_for_attempt(attempt - 1);
        if deadline.is_some_and(|d| Instant::now() + delay > d) {
            return Err(Error::Timeout {
                what: operation_name.to_string(),
                attempts: attempt,
            });
        }

        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Transient error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
