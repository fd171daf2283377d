use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::ClassifiedError;
use crate::observer::Observer;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// One circuit breaker per logical endpoint.
///
/// Breakers are created on first use from the shared configuration and are
/// never removed, so failures on one endpoint cannot starve another.
#[derive(Clone)]
pub struct EndpointBreakerRegistry {
    /// Circuit breakers per endpoint
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Configuration applied to every new breaker
    config: CircuitBreakerConfig,
    /// Receives every transition applied by the registry's breakers
    observer: Option<Arc<dyn Observer>>,
}

impl std::fmt::Debug for EndpointBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointBreakerRegistry")
            .field("endpoints", &self.breakers.len())
            .field("config", &self.config)
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl EndpointBreakerRegistry {
    /// Create a new registry
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
            config,
            observer: None,
        }
    }

    /// Report breaker state transitions to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get or create the breaker for an endpoint.
    ///
    /// The read path only takes a shard read lock. A miss goes through the
    /// entry API, which re-checks under the shard write lock so concurrent
    /// callers always share the single inserted breaker.
    pub fn get_or_create(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(endpoint) {
            return breaker.clone();
        }

        self.breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                debug!(endpoint = endpoint, "Creating new circuit breaker");
                Arc::new(CircuitBreaker::new(endpoint, self.config.clone()))
            })
            .clone()
    }

    /// Run `operation` through the endpoint's breaker
    pub async fn execute<F, Fut, T>(&self, endpoint: &str, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let breaker = self.get_or_create(endpoint);
        breaker
            .execute_observed(self.observer.as_deref(), operation)
            .await
    }

    /// Get the state of an endpoint's breaker, `Closed` if never used
    pub async fn state(&self, endpoint: &str) -> CircuitState {
        match self.lookup(endpoint) {
            Some(breaker) => breaker.state_observed(self.observer.as_deref()),
            None => CircuitState::Closed,
        }
    }

    /// Reset one endpoint's breaker
    pub async fn reset(&self, endpoint: &str) {
        if let Some(breaker) = self.lookup(endpoint) {
            self.reset_breaker(&breaker);
        }
    }

    /// Reset every known breaker
    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        for breaker in breakers {
            self.reset_breaker(&breaker);
        }
    }

    /// Get metrics for an endpoint
    pub async fn metrics(&self, endpoint: &str) -> Option<CircuitBreakerMetrics> {
        match self.lookup(endpoint) {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// Get all endpoint names with circuit breakers
    pub fn endpoints(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Get metrics and state for all endpoints
    pub async fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics, CircuitState)> {
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut results = Vec::with_capacity(breakers.len());
        for (endpoint, breaker) in breakers {
            let metrics = breaker.metrics().await;
            let state = breaker.state_observed(self.observer.as_deref());
            results.push((endpoint, metrics, state));
        }
        results
    }

    // Clone the Arc out so no shard guard is held across an await.
    fn lookup(&self, endpoint: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(endpoint).map(|b| b.clone())
    }

    fn reset_breaker(&self, breaker: &CircuitBreaker) {
        breaker.reset_observed(self.observer.as_deref());
    }
}
