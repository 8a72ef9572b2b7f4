//! Generic bounded polling.
//!
//! A [`WaitPolicy`] repeatedly invokes an injected predicate until it holds,
//! sleeping between attempts with `tokio::time` so tests can run with a
//! paused clock.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::{check_delay, check_multiplier};

/// How the interval grows between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential {
        multiplier: f64,
        #[serde(with = "crate::config::duration_secs")]
        max_interval: Duration,
    },
}

/// Bounded polling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitPolicy {
    #[serde(with = "crate::config::duration_secs")]
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(10), 10)
    }
}

impl WaitPolicy {
    #[must_use]
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            backoff: Backoff::Fixed,
        }
    }

    /// Mesh control plane: 10 attempts, 30 s apart.
    #[must_use]
    pub fn mesh() -> Self {
        Self::fixed(Duration::from_secs(30), 10)
    }

    /// Deployment rollout: 30 attempts, 10 s apart.
    #[must_use]
    pub fn rollout() -> Self {
        Self::fixed(Duration::from_secs(10), 30)
    }

    /// Pod readiness: 10 attempts, 10 s apart.
    #[must_use]
    pub fn pods() -> Self {
        Self::fixed(Duration::from_secs(10), 10)
    }

    /// Reject intervals and multipliers the backoff arithmetic cannot handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] naming the offending field.
    pub fn validate(&self, name: &str) -> Result<()> {
        check_delay(&format!("waits.{name}.interval"), self.interval)?;
        if let Backoff::Exponential {
            multiplier,
            max_interval,
        } = &self.backoff
        {
            check_multiplier(&format!("waits.{name}.backoff.multiplier"), *multiplier)?;
            check_delay(&format!("waits.{name}.backoff.max_interval"), *max_interval)?;
        }
        Ok(())
    }

    /// Sleep to use after the given attempt (0-based).
    #[must_use]
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                multiplier,
                max_interval,
            } => {
                let exp = i32::try_from(attempt.min(16)).unwrap_or(16);
                let secs = self.interval.as_secs_f64() * multiplier.powi(exp);
                Duration::from_secs_f64(secs.min(max_interval.as_secs_f64()))
            }
        }
    }

    /// Poll `check` until it returns `Ok(true)`.
    ///
    /// `Ok(false)`, transient errors and not-found errors mean "not yet";
    /// every other error is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the attempts are exhausted or the
    /// next sleep would cross `deadline`, or the first non-retryable error
    /// raised by `check`.
    pub async fn poll_until<F, Fut>(
        &self,
        what: &str,
        deadline: Option<Instant>,
        mut check: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let max_attempts = self.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(timeout(what, attempt));
            }

            match check().await {
                Ok(true) => {
                    debug!(what, attempt = attempt + 1, "Condition met");
                    return Ok(());
                }
                Ok(false) => debug!(what, attempt = attempt + 1, "Condition not met yet"),
                Err(e) if e.is_transient() || e.is_not_found() => {
                    debug!(what, attempt = attempt + 1, error = %e, "Condition check failed, retrying");
                }
                Err(e) => return Err(e),
            }

            if attempt + 1 == max_attempts {
                break;
            }

            let interval = self.interval_for_attempt(attempt);
            if deadline.is_some_and(|d| Instant::now() + interval > d) {
                return Err(timeout(what, attempt + 1));
            }
            tokio::time::sleep(interval).await;
        }

        Err(timeout(what, max_attempts))
    }
}

/// Policies for each kind of wait the reconciler performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitPolicies {
    pub mesh: WaitPolicy,
    pub rollout: WaitPolicy,
    pub pods: WaitPolicy,
}

impl WaitPolicies {
    /// Validate every policy.
    ///
    /// # Errors
    ///
    /// Returns the first invalid policy's error.
    pub fn validate(&self) -> Result<()> {
        self.mesh.validate("mesh")?;
        self.rollout.validate("rollout")?;
        self.pods.validate("pods")
    }
}

impl Default for WaitPolicies {
    fn default() -> Self {
        Self {
            mesh: WaitPolicy::mesh(),
            rollout: WaitPolicy::rollout(),
            pods: WaitPolicy::pods(),
        }
    }
}

fn timeout(what: &str, attempts: u32) -> Error {
    Error::Timeout {
        what: what.to_string(),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicU32>, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        (count.clone(), count)
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        assert!(WaitPolicies::default().validate().is_ok());

        let mut policies = WaitPolicies::default();
        policies.rollout.backoff = Backoff::Exponential {
            multiplier: -1.5,
            max_interval: Duration::from_secs(60),
        };
        let err = policies.validate().unwrap_err();
        assert!(err.to_string().contains("waits.rollout.backoff.multiplier"));

        let mut policies = WaitPolicies::default();
        policies.pods.interval = Duration::from_secs(u64::MAX);
        assert!(policies.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let (count, c) = counter();
        let start = Instant::now();

        WaitPolicy::fixed(Duration::from_secs(10), 5)
            .poll_until("pods", None, || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
            })
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let (count, c) = counter();

        let err = WaitPolicy::mesh()
            .poll_until("istiod", None, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(false)
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { attempts: 10, .. }));
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_and_not_found_are_retried() {
        let (count, c) = counter();

        WaitPolicy::pods()
            .poll_until("pods", None, || {
                let c = c.clone();
                async move {
                    match c.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(Error::Transient("503".into())),
                        1 => Err(Error::not_found("Deployment", "prometheus")),
                        _ => Ok(true),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_short_circuits() {
        let (count, c) = counter();

        let err = WaitPolicy::pods()
            .poll_until("pods", None, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Fatal("forbidden".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fatal(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_wait_short() {
        let (count, c) = counter();
        let deadline = Instant::now() + Duration::from_secs(25);

        let err = WaitPolicy::rollout()
            .poll_until("rollout", Some(deadline), || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(false)
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { attempts: 3, .. }));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exponential_interval_is_capped() {
        let policy = WaitPolicy {
            interval: Duration::from_secs(1),
            max_attempts: 10,
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_interval: Duration::from_secs(5),
            },
        };
        assert_eq!(policy.interval_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.interval_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.interval_for_attempt(3), Duration::from_secs(5));
    }
}
