//! Resilience core for a remote-cache client.
//!
//! Error classification, per-endpoint circuit breaking, budgeted retries,
//! hedged requests and observation hooks, composed per call by
//! [`ResiliencePipeline`].

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod hedge;
pub mod observer;
pub mod pipeline;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, EndpointBreakerRegistry,
    ObservedCircuitBreaker,
};
pub use config::ResilienceConfig;
pub use error::{classify, ClassifiedError, ErrorContext, ErrorKind, ResilienceError, Result};
pub use hedge::{HedgedExecutor, HedgedRequestConfig};
pub use observer::{CompositeObserver, MetricsCollector, Observer};
pub use pipeline::{RequestInfo, ResiliencePipeline};
pub use retry::{RetryBudget, RetryExecutor, RetryStrategy};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_resilience=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
