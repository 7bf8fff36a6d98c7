//! Retry - Bounded polling with a deadline and a backoff policy
//!
//! Every wait-for-condition loop in the provider goes through [`retry`]:
//! the operation decides per attempt whether it is done, should be retried
//! or failed for good.

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::provider::{ProviderError, ProviderResult};

/// Outcome of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    /// Condition met
    Done(T),
    /// Not yet, try again after the backoff delay
    Retry(ProviderError),
    /// Give up immediately
    Fail(ProviderError),
}

/// Delay between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// `initial`, then `initial + step`, ... capped at `max`
    Incremental {
        initial: Duration,
        step: Duration,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the given (1-based) attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Incremental { initial, step, max } => {
                let grown = *initial + step.saturating_mul(attempt.saturating_sub(1));
                grown.min(*max)
            }
        }
    }
}

/// Deadline and backoff for a retry loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub backoff: Backoff,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Budget used when waiting for deletions to converge
    pub const DELETE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

    pub fn fixed(timeout: Duration, delay: Duration) -> Self {
        Self {
            timeout,
            backoff: Backoff::Fixed(delay),
            max_attempts: None,
        }
    }

    pub fn incremental(timeout: Duration, initial: Duration, step: Duration, max: Duration) -> Self {
        Self {
            timeout,
            backoff: Backoff::Incremental { initial, step, max },
            max_attempts: None,
        }
    }

    /// 15 minutes, polling every 5 seconds
    pub fn delete() -> Self {
        Self::fixed(Self::DELETE_TIMEOUT, Duration::from_secs(5))
    }

    /// Short inline retry for conflict errors
    pub fn transient() -> Self {
        Self::incremental(
            Duration::from_secs(60),
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(10),
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::delete()
    }
}

/// Run `op` until it reports done or failed, or the policy runs out
///
/// On timeout the last retryable error is returned with its kind kept.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    // Unbounded when the timeout does not fit the clock
    let deadline = Instant::now().checked_add(policy.timeout);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(err) => err,
        };

        let delay = policy.backoff.delay(attempt);
        let exhausted = policy.max_attempts.is_some_and(|max| attempt >= max);
        if exhausted || deadline.is_some_and(|deadline| Instant::now() + delay > deadline) {
            return Err(ProviderError {
                message: format!(
                    "gave up after {} attempt(s) within {:?}: {}",
                    attempt, policy.timeout, err.message
                ),
                kind: err.kind,
                cause: err.cause,
            });
        }

        debug!(
            "attempt {} not done ({}), retrying in {:?}",
            attempt, err.message, delay
        );
        tokio::time::sleep(delay).await;
    }
}
