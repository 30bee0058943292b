//! Bounded retry loops
//!
//! Every polling site in the runner goes through [`retry`]: daemon restarts,
//! firewall flushes, config reload detection and node readiness. A budget is
//! always finite, so no loop can hang the run.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// How long a retry loop may keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryLimit {
    /// Give up after this many attempts
    Attempts(usize),
    /// Give up once this much time has passed since the first attempt
    Duration(Duration),
}

/// Budget governing one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    pub limit: RetryLimit,
    /// Pause between attempts
    pub interval: Duration,
}

impl RetryBudget {
    pub fn attempts(max_attempts: usize, interval: Duration) -> Self {
        Self {
            limit: RetryLimit::Attempts(max_attempts.max(1)),
            interval,
        }
    }

    pub fn timeout(max_duration: Duration, interval: Duration) -> Self {
        Self {
            limit: RetryLimit::Duration(max_duration),
            interval,
        }
    }

    /// Whether another attempt is allowed after `attempts` have run
    fn allows_another(&self, attempts: usize, started: Instant) -> bool {
        match self.limit {
            RetryLimit::Attempts(max) => attempts < max,
            RetryLimit::Duration(max) => started.elapsed() + self.interval <= max,
        }
    }
}

/// The budget ran out before the action succeeded
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts in {elapsed:?}: {last_error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    pub attempts: usize,
    pub elapsed: Duration,
    pub last_error: E,
}

/// Run `action` until it succeeds or `budget` is spent
///
/// The action receives the 1-based attempt number. It always runs at least
/// once, even with a zero-duration budget.
pub async fn retry<T, E, F, Fut>(budget: &RetryBudget, mut action: F) -> Result<T, RetryExhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match action(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !budget.allows_another(attempt, started) {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        last_error: err,
                    });
                }
                debug!("Attempt {} failed: {}", attempt, err);
            }
        }

        if !budget.interval.is_zero() {
            tokio::time::sleep(budget.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let budget = RetryBudget::attempts(5, Duration::from_millis(1));
        let result: Result<usize, RetryExhausted<String>> = retry(&budget, |attempt| async move {
            if attempt == 3 {
                Ok(attempt)
            } else {
                Err(format!("attempt {}", attempt))
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_is_respected() {
        let calls = AtomicUsize::new(0);
        let budget = RetryBudget::attempts(4, Duration::ZERO);

        let result: Result<(), _> = retry(&budget, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("still down") }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "still down");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_duration_budget_times_out() {
        let budget = RetryBudget::timeout(Duration::from_millis(50), Duration::from_millis(10));
        let started = std::time::Instant::now();

        let result: Result<(), _> = retry(&budget, |_| async { Err::<(), _>("never") }).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.unwrap_err().attempts >= 2);
    }

    #[tokio::test]
    async fn test_zero_budget_still_runs_once() {
        let budget = RetryBudget::timeout(Duration::ZERO, Duration::from_millis(10));
        let result: Result<&str, RetryExhausted<&str>> = retry(&budget, |_| async { Ok("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }
}
