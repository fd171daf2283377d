use super::strategy::RetryStrategy;
use crate::error::{ClassifiedError, ErrorContext};
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs an operation repeatedly according to a retry strategy.
///
/// Attempts are strictly sequential. The only suspension point is the wait
/// between attempts, which races the caller's cancellation token.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    strategy: RetryStrategy,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Execute an operation with retries
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.execute_with_hook(cancel, |_, _| {}, operation).await
    }

    /// Execute with retries, calling `on_retry(next_attempt, &last_error)`
    /// right before each wait
    pub async fn execute_with_hook<F, Fut, T, H>(
        &self,
        cancel: &CancellationToken,
        mut on_retry: H,
        mut operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
        H: FnMut(u32, &ClassifiedError),
    {
        let budget = self.strategy.budget();
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "Request succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            let attempts = attempt + 1;

            if !self.strategy.should_retry(&error, attempts) {
                debug!(attempts, error = %error, "Error not retryable");
                return Err(error);
            }

            if cancel.is_cancelled() {
                debug!(attempts, "Cancelled before retry");
                return Err(cancelled(attempt, start));
            }

            if budget.is_exhausted(attempts, start.elapsed()) {
                warn!(
                    attempts,
                    max_attempts = budget.max_attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(error);
            }

            let wait = self.strategy.next_interval(attempts);
            if wait.is_zero() {
                debug!(attempts, error = %error, "No backoff interval, giving up");
                return Err(error);
            }

            on_retry(attempts + 1, &error);
            debug!(
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Request failed, retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempts, "Cancelled during backoff");
                    return Err(cancelled(attempt, start));
                }
                _ = tokio::time::sleep(wait) => {}
            }

            attempt += 1;
        }
    }
}

fn cancelled(retries: u32, start: Instant) -> ClassifiedError {
    ClassifiedError::cancelled(Some(
        ErrorContext::default()
            .with_retry_count(retries)
            .with_elapsed(start.elapsed()),
    ))
}
