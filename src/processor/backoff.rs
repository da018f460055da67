//! Retry policy and the cancellable retry loop shared by chunk workers.

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_JITTER: f64 = 0.2;

/// How a failed chunk query is retried.
///
/// `max_attempts: None` retries until success or cancellation. Delays double
/// from `initial_backoff` up to `max_backoff`; each delay is then stretched by
/// a random factor in `[0, jitter]` so workers hitting the same endpoint do
/// not retry in lockstep.
///
/// Errors the endpoint reports as permanent (oversized responses, provider
/// range limits) end a chunk after one attempt unless
/// [`RetryPolicy::retry_permanent_errors`] is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: Option<usize>,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter: f64,
    #[serde(default = "default_abort_on_permanent")]
    abort_on_permanent: bool,
}

fn default_abort_on_permanent() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            jitter: DEFAULT_JITTER,
            abort_on_permanent: true,
        }
    }

    pub fn bounded(max_attempts: usize) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::unbounded()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retries permanent errors like any other failure. Under an unbounded
    /// policy a chunk over the provider's range limit then retries until
    /// cancelled.
    pub fn retry_permanent_errors(mut self) -> Self {
        self.abort_on_permanent = false;
        self
    }

    pub fn aborts_on_permanent(&self) -> bool {
        self.abort_on_permanent
    }

    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == Some(0) {
            bail!("retry max_attempts must be greater than 0");
        }
        if self.initial_backoff > self.max_backoff {
            bail!("retry initial_backoff must not exceed max_backoff");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            bail!("retry jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }

    pub(crate) fn is_exhausted(&self, attempt: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }

    /// Un-jittered delay after the `attempt`-th failure (1-based).
    pub(crate) fn base_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    pub(crate) fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.saturating_add(base.mul_f64(factor))
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

pub(crate) enum RetryOutcome<T> {
    Success { value: T, attempts: usize },
    Failed { error: anyhow::Error, attempts: usize },
    Cancelled { attempts: usize },
}

/// Runs `operation` until it succeeds, the policy gives up, `classify_error`
/// aborts, or `token` fires. Cancellation is observed before every attempt,
/// while an attempt is in flight, and during backoff sleeps.
pub(crate) async fn retry_with_backoff<T, F, Fut, L, C>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> RetryOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error),
    C: FnMut(&anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;

    loop {
        if token.is_cancelled() {
            return RetryOutcome::Cancelled { attempts: attempt };
        }

        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return RetryOutcome::Cancelled { attempts: attempt },
            result = operation(attempt) => result,
        };

        let error = match result {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(_) if token.is_cancelled() => {
                return RetryOutcome::Cancelled { attempts: attempt }
            }
            Err(error) => error,
        };

        if matches!(classify_error(&error), RetryDisposition::Abort) || policy.is_exhausted(attempt)
        {
            return RetryOutcome::Failed {
                error,
                attempts: attempt,
            };
        }

        let delay = policy.delay_for(attempt);
        on_retry(attempt, delay, &error);

        if !sleep_with_cancellation(delay, token).await {
            return RetryOutcome::Cancelled { attempts: attempt };
        }
    }
}

/// Returns `false` when `token` fired before `delay` elapsed.
pub(crate) async fn sleep_with_cancellation(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !token.is_cancelled();
    }

    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
