use super::breaker::CircuitBreaker;
use super::types::CircuitState;
use crate::error::ClassifiedError;
use crate::observer::Observer;
use std::future::Future;
use std::sync::Arc;

/// Circuit breaker that reports its state transitions to an observer.
///
/// The breaker hands over exactly the transitions it applied under its lock,
/// so each one is reported once, in order, with nothing skipped.
pub struct ObservedCircuitBreaker {
    inner: Arc<CircuitBreaker>,
    observer: Arc<dyn Observer>,
}

impl ObservedCircuitBreaker {
    pub fn new(inner: Arc<CircuitBreaker>, observer: Arc<dyn Observer>) -> Self {
        Self { inner, observer }
    }

    pub fn inner(&self) -> &Arc<CircuitBreaker> {
        &self.inner
    }

    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.inner
            .execute_observed(Some(self.observer.as_ref()), operation)
            .await
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.state_observed(Some(self.observer.as_ref()))
    }

    pub async fn reset(&self) {
        self.inner.reset_observed(Some(self.observer.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::observer::ObserverResult;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Transitions(Mutex<Vec<(String, CircuitState, CircuitState)>>);

    impl Observer for Transitions {
        fn on_circuit_state_change(
            &self,
            name: &str,
            from: CircuitState,
            to: CircuitState,
        ) -> ObserverResult {
            self.0.lock().push((name.to_string(), from, to));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_each_transition_once() {
        let transitions = Arc::new(Transitions::default());
        let breaker = ObservedCircuitBreaker::new(
            Arc::new(CircuitBreaker::new(
                "cache",
                CircuitBreakerConfig {
                    failure_threshold: 2,
                    success_threshold: 1,
                    open_timeout_ms: 100,
                    half_open_max_requests: 1,
                },
            )),
            transitions.clone(),
        );

        for _ in 0..2 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(ClassifiedError::server("down")) })
                .await;
        }
        // rejected calls while open do not report anything
        let _ = breaker.execute(|| async { Ok(()) }).await;
        assert_eq!(transitions.0.lock().len(), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(breaker.execute(|| async { Ok(()) }).await.is_ok());

        // resetting a closed breaker is not a transition
        breaker.reset().await;

        let seen = transitions.0.lock().clone();
        assert_eq!(
            seen,
            vec![
                ("cache".to_string(), CircuitState::Closed, CircuitState::Open),
                ("cache".to_string(), CircuitState::Open, CircuitState::HalfOpen),
                ("cache".to_string(), CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reports_half_open() {
        let transitions = Arc::new(Transitions::default());
        let breaker = ObservedCircuitBreaker::new(
            Arc::new(CircuitBreaker::new(
                "cache",
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    success_threshold: 1,
                    open_timeout_ms: 50,
                    half_open_max_requests: 1,
                },
            )),
            transitions.clone(),
        );

        let _ = breaker
            .execute(|| async { Err::<(), _>(ClassifiedError::timeout("slow")) })
            .await;
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let seen = transitions.0.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, CircuitState::Open);
        assert_eq!(seen[1].2, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_report_once() {
        let transitions = Arc::new(Transitions::default());
        let breaker = Arc::new(ObservedCircuitBreaker::new(
            Arc::new(CircuitBreaker::new(
                "cache",
                CircuitBreakerConfig {
                    failure_threshold: 1,
                    success_threshold: 1,
                    open_timeout_ms: 50,
                    half_open_max_requests: 4,
                },
            )),
            transitions.clone(),
        ));

        let _ = breaker
            .execute(|| async { Err::<(), _>(ClassifiedError::timeout("slow")) })
            .await;
        tokio::time::advance(Duration::from_millis(50)).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move { breaker.state().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), CircuitState::HalfOpen);
        }

        assert_eq!(transitions.0.lock().len(), 2);
    }
}
