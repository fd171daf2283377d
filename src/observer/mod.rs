//! Lifecycle notifications for monitoring.
//!
//! Hooks are fire-and-forget: their results are logged and discarded and
//! can never change the outcome of the operation being observed.

pub mod collector;
pub mod telemetry;

pub use collector::{EndpointMetrics, MetricsCollector, MetricsSnapshot, DEFAULT_LATENCY_WINDOW};
pub use telemetry::{install_prometheus_recorder, LoggingObserver, TelemetryObserver};

use crate::circuit_breaker::CircuitState;
use crate::error::ClassifiedError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure reported by an observer hook
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("observer failed: {0}")]
pub struct ObserverError(pub String);

pub type ObserverResult = std::result::Result<(), ObserverError>;

/// Receives lifecycle events. Every hook defaults to a no-op.
pub trait Observer: Send + Sync {
    fn on_request_start(&self, _method: &str, _path: &str) -> ObserverResult {
        Ok(())
    }

    fn on_request_end(
        &self,
        _method: &str,
        _path: &str,
        _duration: Duration,
        _error: Option<&ClassifiedError>,
    ) -> ObserverResult {
        Ok(())
    }

    /// `attempt` is the number of the attempt about to be made (2 for the first retry)
    fn on_retry_attempt(
        &self,
        _method: &str,
        _path: &str,
        _attempt: u32,
        _error: &ClassifiedError,
    ) -> ObserverResult {
        Ok(())
    }

    fn on_circuit_state_change(
        &self,
        _name: &str,
        _from: CircuitState,
        _to: CircuitState,
    ) -> ObserverResult {
        Ok(())
    }

    fn on_cache_hit(&self, _key: &str) -> ObserverResult {
        Ok(())
    }

    fn on_cache_miss(&self, _key: &str) -> ObserverResult {
        Ok(())
    }
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Run one hook, containing both returned errors and panics
pub(crate) fn guarded<F>(hook: &'static str, f: F)
where
    F: FnOnce() -> ObserverResult,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(hook, error = %e, "Observer hook failed"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(hook, panic = %message, "Observer hook panicked");
        }
    }
}

/// Fans every event out to its observers in registration order.
///
/// Each observer is isolated: an error or panic in one is logged and the
/// remaining observers still run. The composite itself always returns `Ok`.
#[derive(Clone, Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn Observer>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.add(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn each<F>(&self, hook: &'static str, f: F)
    where
        F: Fn(&dyn Observer) -> ObserverResult,
    {
        for observer in &self.observers {
            guarded(hook, || f(observer.as_ref()));
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Observer for CompositeObserver {
    fn on_request_start(&self, method: &str, path: &str) -> ObserverResult {
        self.each("on_request_start", |o| o.on_request_start(method, path));
        Ok(())
    }

    fn on_request_end(
        &self,
        method: &str,
        path: &str,
        duration: Duration,
        error: Option<&ClassifiedError>,
    ) -> ObserverResult {
        self.each("on_request_end", |o| {
            o.on_request_end(method, path, duration, error)
        });
        Ok(())
    }

    fn on_retry_attempt(
        &self,
        method: &str,
        path: &str,
        attempt: u32,
        error: &ClassifiedError,
    ) -> ObserverResult {
        self.each("on_retry_attempt", |o| {
            o.on_retry_attempt(method, path, attempt, error)
        });
        Ok(())
    }

    fn on_circuit_state_change(
        &self,
        name: &str,
        from: CircuitState,
        to: CircuitState,
    ) -> ObserverResult {
        self.each("on_circuit_state_change", |o| {
            o.on_circuit_state_change(name, from, to)
        });
        Ok(())
    }

    fn on_cache_hit(&self, key: &str) -> ObserverResult {
        self.each("on_cache_hit", |o| o.on_cache_hit(key));
        Ok(())
    }

    fn on_cache_miss(&self, key: &str) -> ObserverResult {
        self.each("on_cache_miss", |o| o.on_cache_miss(key));
        Ok(())
    }
}
