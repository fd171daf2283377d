//! Per-call composition of the resilience components.
//!
//! ```text
//! caller
//!   -> RetryExecutor            (sequential attempts, cancellable backoff)
//!     -> HedgedExecutor         (optional staggered parallel attempts)
//!       -> EndpointBreakerRegistry (per-endpoint fail fast)
//!         -> operation
//! ```
//!
//! Observers see request start/end, every retry and every breaker
//! transition.

use crate::circuit_breaker::{CircuitState, EndpointBreakerRegistry};
use crate::config::ResilienceConfig;
use crate::error::{ClassifiedError, ErrorContext, Result};
use crate::hedge::HedgedExecutor;
use crate::observer::{guarded, CompositeObserver, Observer};
use crate::retry::RetryExecutor;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Identifies one logical call for observers and breaker selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    /// Circuit breaker key; defaults to the path
    pub endpoint: String,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method: method.into(),
            endpoint: path.clone(),
            path,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Retry, hedging, circuit breaking and observation for every outbound call
#[derive(Debug, Clone)]
pub struct ResiliencePipeline {
    registry: Option<EndpointBreakerRegistry>,
    retry: RetryExecutor,
    hedge: Option<HedgedExecutor>,
    observer: Arc<CompositeObserver>,
}

impl ResiliencePipeline {
    /// Build a pipeline from validated configuration
    pub fn new(config: ResilienceConfig, observers: Vec<Arc<dyn Observer>>) -> Result<Self> {
        config.validate()?;

        let observer = Arc::new(CompositeObserver::new(observers));
        let registry = config.circuit_breaker_enabled.then(|| {
            EndpointBreakerRegistry::new(config.circuit_breaker.clone())
                .with_observer(observer.clone())
        });
        let hedge = config
            .hedging
            .clone()
            .filter(|h| h.max_parallel_attempts > 1)
            .map(HedgedExecutor::new);

        info!(
            circuit_breaker = registry.is_some(),
            hedging = hedge.is_some(),
            max_attempts = config.retry.budget().max_attempts,
            observers = observer.len(),
            "Resilience pipeline initialized"
        );

        Ok(Self {
            registry,
            retry: RetryExecutor::new(config.retry),
            hedge,
            observer,
        })
    }

    pub fn observer(&self) -> &Arc<CompositeObserver> {
        &self.observer
    }

    pub fn registry(&self) -> Option<&EndpointBreakerRegistry> {
        self.registry.as_ref()
    }

    /// Breaker state for an endpoint, `Closed` when breaking is disabled
    pub async fn circuit_state(&self, endpoint: &str) -> CircuitState {
        match &self.registry {
            Some(registry) => registry.state(endpoint).await,
            None => CircuitState::Closed,
        }
    }

    pub fn record_cache_hit(&self, key: &str) {
        guarded("on_cache_hit", || self.observer.on_cache_hit(key));
    }

    pub fn record_cache_miss(&self, key: &str) {
        guarded("on_cache_miss", || self.observer.on_cache_miss(key));
    }

    /// Execute `operation` with the full resilience stack.
    ///
    /// Exactly one terminal outcome is returned. Errors that carry no
    /// request context get the method, path, retry count and elapsed time.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        request: &RequestInfo,
        operation: F,
    ) -> std::result::Result<T, ClassifiedError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, ClassifiedError>> + Send + 'static,
        T: Send + 'static,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "resilient_request",
            %request_id,
            method = %request.method,
            path = %request.path
        );

        async move {
            guarded("on_request_start", || {
                self.observer
                    .on_request_start(&request.method, &request.path)
            });
            let start = Instant::now();

            let attempt = self.protected(&request.endpoint, operation);
            let hedge = &self.hedge;
            let mut retries: u32 = 0;

            let result = self
                .retry
                .execute_with_hook(
                    cancel,
                    |next_attempt, error| {
                        retries += 1;
                        guarded("on_retry_attempt", || {
                            self.observer.on_retry_attempt(
                                &request.method,
                                &request.path,
                                next_attempt,
                                error,
                            )
                        });
                    },
                    || {
                        let attempt = attempt.clone();
                        async move {
                            match hedge {
                                Some(hedge) => hedge.execute(cancel, attempt).await,
                                None => attempt().await,
                            }
                        }
                    },
                )
                .await;

            let elapsed = start.elapsed();
            let result = result.map_err(|e| {
                if e.context().is_some() {
                    return e;
                }
                e.with_context(
                    ErrorContext::new(request.method.clone(), request.path.clone())
                        .with_retry_count(retries)
                        .with_elapsed(elapsed),
                )
            });

            debug!(
                retries,
                elapsed_ms = elapsed.as_millis() as u64,
                success = result.is_ok(),
                "Request finished"
            );
            guarded("on_request_end", || {
                self.observer.on_request_end(
                    &request.method,
                    &request.path,
                    elapsed,
                    result.as_ref().err(),
                )
            });
            result
        }
        .instrument(span)
        .await
    }

    /// One attempt: the operation behind the endpoint's breaker
    fn protected<F, Fut, T>(
        &self,
        endpoint: &str,
        operation: F,
    ) -> impl Fn() -> std::pin::Pin<
        Box<dyn Future<Output = std::result::Result<T, ClassifiedError>> + Send>,
    > + Clone
           + Send
           + Sync
           + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, ClassifiedError>> + Send + 'static,
        T: Send + 'static,
    {
        let operation = Arc::new(operation);
        let registry = self.registry.clone();
        let endpoint = endpoint.to_string();

        move || {
            let operation = operation.clone();
            let registry = registry.clone();
            let endpoint = endpoint.clone();
            Box::pin(async move {
                match registry {
                    Some(registry) => registry.execute(&endpoint, || (*operation)()).await,
                    None => (*operation)().await,
                }
            })
        }
    }
}
