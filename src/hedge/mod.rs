//! Hedged requests: staggered parallel attempts of the same operation.
//!
//! Attempt 1 starts immediately. Each further attempt starts once
//! `inter_attempt_delay` passes without a success, or as soon as every
//! in-flight attempt has failed. The first success wins; the remaining
//! attempts are told to stop through a shared cancellation token and their
//! results are dropped.

use crate::error::ClassifiedError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hedged request configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedgedRequestConfig {
    /// Upper bound on attempts in flight for one call (1 disables hedging)
    #[serde(default = "default_max_parallel_attempts")]
    pub max_parallel_attempts: u32,

    /// Delay between attempt launches in milliseconds
    #[serde(default = "default_inter_attempt_delay_ms")]
    pub inter_attempt_delay_ms: u64,
}

fn default_max_parallel_attempts() -> u32 {
    2
}

fn default_inter_attempt_delay_ms() -> u64 {
    50
}

impl Default for HedgedRequestConfig {
    fn default() -> Self {
        Self {
            max_parallel_attempts: default_max_parallel_attempts(),
            inter_attempt_delay_ms: default_inter_attempt_delay_ms(),
        }
    }
}

impl HedgedRequestConfig {
    pub fn new(max_parallel_attempts: u32, inter_attempt_delay: Duration) -> Self {
        Self {
            max_parallel_attempts,
            inter_attempt_delay_ms: inter_attempt_delay.as_millis() as u64,
        }
    }

    pub fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }
}

type Outcome<T> = (u32, Result<T, ClassifiedError>);

/// Runs staggered parallel attempts and returns the first success
#[derive(Debug, Clone, Default)]
pub struct HedgedExecutor {
    config: HedgedRequestConfig,
}

impl HedgedExecutor {
    pub fn new(config: HedgedRequestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HedgedRequestConfig {
        &self.config
    }

    /// Execute `operation` with hedging.
    ///
    /// Attempts run as spawned tasks, so the operation and its futures must
    /// be `Send + 'static`.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ClassifiedError>> + Send + 'static,
        T: Send + 'static,
    {
        let max_attempts = self.config.max_parallel_attempts;
        if max_attempts <= 1 {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ClassifiedError::cancelled(None)),
                result = operation() => result,
            };
        }

        let operation = Arc::new(operation);
        let delay = self.config.inter_attempt_delay();

        // Cancelled on outer cancellation, and on every return path via the guard.
        let attempts_token = cancel.child_token();
        let _stop_attempts = attempts_token.clone().drop_guard();

        let (tx, mut rx) = mpsc::unbounded_channel::<Outcome<T>>();
        let mut launched: u32 = 0;
        let mut finished: u32 = 0;
        let mut first_error: Option<ClassifiedError> = None;

        launched += 1;
        spawn_attempt(launched, &operation, &attempts_token, &tx);
        let mut next_launch_at = Instant::now() + delay;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(launched, finished, "Hedged request cancelled");
                    return Err(ClassifiedError::cancelled(None));
                }
                Some((attempt, result)) = rx.recv() => {
                    finished += 1;
                    let error = match result {
                        Ok(value) => {
                            debug!(attempt, launched, "Hedged attempt succeeded");
                            return Ok(value);
                        }
                        Err(e) => e,
                    };
                    debug!(attempt, error = %error, "Hedged attempt failed");
                    let first = first_error.get_or_insert(error);

                    if finished == launched {
                        if launched >= max_attempts {
                            debug!(launched, "All hedged attempts failed");
                            return Err(first.clone());
                        }
                        launched += 1;
                        spawn_attempt(launched, &operation, &attempts_token, &tx);
                        next_launch_at = Instant::now() + delay;
                    }
                }
                _ = tokio::time::sleep_until(next_launch_at), if launched < max_attempts => {
                    launched += 1;
                    debug!(attempt = launched, delay_ms = delay.as_millis() as u64, "Launching hedged attempt");
                    spawn_attempt(launched, &operation, &attempts_token, &tx);
                    next_launch_at = Instant::now() + delay;
                }
            }
        }
    }
}

fn spawn_attempt<F, Fut, T>(
    attempt: u32,
    operation: &Arc<F>,
    token: &CancellationToken,
    tx: &mpsc::UnboundedSender<Outcome<T>>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ClassifiedError>> + Send + 'static,
    T: Send + 'static,
{
    let operation = operation.clone();
    let token = token.clone();
    let tx = tx.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(attempt, "Hedged attempt stopped");
            }
            result = (*operation)() => {
                // receiver is gone once a winner was returned
                let _ = tx.send((attempt, result));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max: u32, delay_ms: u64) -> HedgedExecutor {
        HedgedExecutor::new(HedgedRequestConfig::new(max, Duration::from_millis(delay_ms)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_attempt_alone_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let start = Instant::now();

        let result = executor(3, 5)
            .execute(&CancellationToken::new(), move || {
                let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Err(ClassifiedError::timeout("slow replica"))
                    } else {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_fail_returns_first_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let err = executor(3, 5)
            .execute(&CancellationToken::new(), move || {
                let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(ClassifiedError::server(format!("failure {}", n))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.message(), "failure 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_wins_regardless_of_order() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result = executor(2, 5)
            .execute(&CancellationToken::new(), move || {
                let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    let latency = if n == 1 { 100 } else { 10 };
                    tokio::time::sleep(Duration::from_millis(latency)).await;
                    Ok::<_, ClassifiedError>(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_success_launches_nothing_else() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let result = executor(3, 50)
            .execute(&CancellationToken::new(), move || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ClassifiedError>("value") }
            })
            .await;

        assert_eq!(result.unwrap(), "value");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outer_cancellation_stops_attempts() {
        let completed = Arc::new(AtomicU32::new(0));
        let done = completed.clone();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(7)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = executor(3, 5)
            .execute(&cancel, move || {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ClassifiedError>(())
                }
            })
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_cancellation());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_is_direct_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let err = executor(1, 5)
            .execute(&CancellationToken::new(), move || {
                counted.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClassifiedError::network("reset")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_defaults() {
        let config: HedgedRequestConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.max_parallel_attempts, 2);
        assert_eq!(config.inter_attempt_delay(), Duration::from_millis(50));
    }
}
