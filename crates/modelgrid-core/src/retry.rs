//! Bounded exponential backoff for transient collaborator failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::duration::HumanDuration;
use crate::error::CollaboratorError;

/// How often and how patiently a transient failure is retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub attempts: u32,
    /// Delay before the second attempt; doubled after every failure.
    pub base_delay: HumanDuration,
    /// Upper bound for a single delay.
    pub max_delay: HumanDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: HumanDuration::from_millis(500),
            max_delay: HumanDuration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: HumanDuration::from_millis(0),
            max_delay: HumanDuration::from_millis(0),
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_duration();
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor).min(self.max_delay.as_duration())
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= attempts => {
                    error!(op = op_name, attempts, error = %e, "retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: HumanDuration::from_secs(1),
            max_delay: HumanDuration::from_secs(3),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3));
        assert_eq!(policy.delay_after(10), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::default()
            .run("op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollaboratorError::BackendUnavailable("down".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = RetryPolicy::default()
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::BackendUnavailable("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = RetryPolicy::default()
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::Rejected("400".into()))
            })
            .await;
        assert_eq!(result, Err(CollaboratorError::Rejected("400".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
