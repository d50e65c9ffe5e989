use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::provider::ProviderError;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Per-item outcomes of a batch. Items never started because the batch was
/// cancelled are counted separately and are neither successes nor failures.
#[derive(Debug)]
pub struct BatchTally<E> {
    pub succeeded: usize,
    pub failures: Vec<E>,
    pub not_attempted: usize,
}

impl<E> Default for BatchTally<E> {
    fn default() -> Self {
        Self {
            succeeded: 0,
            failures: Vec::new(),
            not_attempted: 0,
        }
    }
}

impl<E> BatchTally<E> {
    pub fn record(&mut self, outcome: Result<(), E>) {
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(err) => self.failures.push(err),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    pub fn cancelled(&self) -> bool {
        self.not_attempted > 0
    }
}

/// Runs `work` for every item with at most `concurrency` in flight. One
/// item's failure never stops the others. Cancellation is checked as each
/// item starts.
pub async fn run_isolated<T, E, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    cancel: &CancellationToken,
    work: F,
) -> BatchTally<E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut tally = BatchTally::default();
    let mut outcomes = stream::iter(items.into_iter().map(|item| {
        let cancel = cancel.clone();
        let fut = work(item);
        async move {
            if cancel.is_cancelled() {
                None
            } else {
                Some(fut.await)
            }
        }
    }))
    .buffer_unordered(concurrency.max(1));

    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Some(result) => tally.record(result),
            None => tally.not_attempted += 1,
        }
    }
    tally
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential delay after the `attempt`-th failure with ±25% jitter,
    /// capped at ten seconds.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exp).min(MAX_RETRY_DELAY);
        let factor: f64 = rand::thread_rng().gen_range(0.75..=1.25);
        raw.mul_f64(factor).min(MAX_RETRY_DELAY)
    }
}

/// Calls `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` calls have been made. Also returns the number of
/// calls made. Cancellation cuts a backoff sleep short and returns the last
/// error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    context: &str,
    mut op: F,
) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) if err.is_retryable() && attempts < max_attempts => {
                let delay = policy.delay_after(attempts);
                warn!(
                    context,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "provider call failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return (Err(err), attempts),
                    _ = sleep(delay) => {}
                }
            }
            Err(err) => return (Err(err), attempts),
        }
    }
}

/// A child token for one batch, cancelled by the parent or after
/// `timeout_secs`. Dropping the scope stops the timer.
pub struct BatchScope {
    pub token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl BatchScope {
    pub fn new(parent: &CancellationToken, timeout_secs: Option<u64>) -> Self {
        let token = parent.child_token();
        let timer = timeout_secs.map(|secs| {
            let token = token.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(secs)).await;
                token.cancel();
            })
        });
        Self { token, timer }
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
