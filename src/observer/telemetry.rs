use super::{Observer, ObserverResult};
use crate::circuit_breaker::CircuitState;
use crate::error::{ClassifiedError, ResilienceError, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Install the global Prometheus recorder and describe the SDK series.
///
/// Fails if another recorder was already installed in this process.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        ResilienceError::Metrics(format!("Failed to install metrics recorder: {}", e))
    })?;

    describe_metrics();
    info!("Prometheus metrics recorder installed");

    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("sdk_requests_total", "Total number of operations started");
    describe_histogram!(
        "sdk_request_duration_seconds",
        "Operation latencies in seconds, retries included"
    );
    describe_counter!(
        "sdk_request_errors_total",
        "Total number of operations that ended in an error"
    );
    describe_counter!("sdk_retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "sdk_circuit_breaker_transitions_total",
        "Total number of circuit breaker state transitions"
    );
    describe_gauge!(
        "sdk_circuit_breaker_state",
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );
    describe_counter!("sdk_cache_requests_total", "Cache lookups by result");

    debug!("All metrics registered with descriptions");
}

/// Forwards every event to the `metrics` facade.
///
/// Without an installed recorder the calls are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryObserver;

impl Observer for TelemetryObserver {
    fn on_request_start(&self, method: &str, path: &str) -> ObserverResult {
        let labels = [("method", method.to_string()), ("path", path.to_string())];
        counter!("sdk_requests_total", &labels).increment(1);
        Ok(())
    }

    fn on_request_end(
        &self,
        method: &str,
        path: &str,
        duration: Duration,
        error: Option<&ClassifiedError>,
    ) -> ObserverResult {
        let labels = [("method", method.to_string()), ("path", path.to_string())];
        histogram!("sdk_request_duration_seconds", &labels).record(duration.as_secs_f64());

        if let Some(error) = error {
            let labels = [
                ("method", method.to_string()),
                ("path", path.to_string()),
                ("kind", error.kind().to_string()),
            ];
            counter!("sdk_request_errors_total", &labels).increment(1);
        }
        Ok(())
    }

    fn on_retry_attempt(
        &self,
        method: &str,
        path: &str,
        _attempt: u32,
        error: &ClassifiedError,
    ) -> ObserverResult {
        let labels = [
            ("method", method.to_string()),
            ("path", path.to_string()),
            ("kind", error.kind().to_string()),
        ];
        counter!("sdk_retry_attempts_total", &labels).increment(1);
        Ok(())
    }

    fn on_circuit_state_change(
        &self,
        name: &str,
        from: CircuitState,
        to: CircuitState,
    ) -> ObserverResult {
        let labels = [
            ("breaker", name.to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];
        counter!("sdk_circuit_breaker_transitions_total", &labels).increment(1);

        let labels = [("breaker", name.to_string())];
        gauge!("sdk_circuit_breaker_state", &labels).set(to.as_gauge());
        Ok(())
    }

    fn on_cache_hit(&self, _key: &str) -> ObserverResult {
        // keys are unbounded, keep them out of the label set
        counter!("sdk_cache_requests_total", "result" => "hit").increment(1);
        Ok(())
    }

    fn on_cache_miss(&self, _key: &str) -> ObserverResult {
        counter!("sdk_cache_requests_total", "result" => "miss").increment(1);
        Ok(())
    }
}

/// Emits every event as a structured `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn on_request_start(&self, method: &str, path: &str) -> ObserverResult {
        debug!(method, path, "Request started");
        Ok(())
    }

    fn on_request_end(
        &self,
        method: &str,
        path: &str,
        duration: Duration,
        error: Option<&ClassifiedError>,
    ) -> ObserverResult {
        match error {
            None => debug!(
                method,
                path,
                duration_ms = duration.as_millis() as u64,
                "Request completed"
            ),
            Some(e) => warn!(
                method,
                path,
                duration_ms = duration.as_millis() as u64,
                kind = %e.kind(),
                error = %e,
                "Request failed"
            ),
        }
        Ok(())
    }

    fn on_retry_attempt(
        &self,
        method: &str,
        path: &str,
        attempt: u32,
        error: &ClassifiedError,
    ) -> ObserverResult {
        debug!(method, path, attempt, error = %error, "Retrying request");
        Ok(())
    }

    fn on_circuit_state_change(
        &self,
        name: &str,
        from: CircuitState,
        to: CircuitState,
    ) -> ObserverResult {
        info!(breaker = name, %from, %to, "Circuit breaker state changed");
        Ok(())
    }

    fn on_cache_hit(&self, key: &str) -> ObserverResult {
        debug!(key, "Cache hit");
        Ok(())
    }

    fn on_cache_miss(&self, key: &str) -> ObserverResult {
        debug!(key, "Cache miss");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observers_without_recorder_dont_fail() {
        let err = ClassifiedError::server("boom");
        for observer in [&TelemetryObserver as &dyn Observer, &LoggingObserver] {
            assert!(observer.on_request_start("GET", "/k").is_ok());
            assert!(observer
                .on_request_end("GET", "/k", Duration::from_millis(3), Some(&err))
                .is_ok());
            assert!(observer.on_retry_attempt("GET", "/k", 2, &err).is_ok());
            assert!(observer
                .on_circuit_state_change("cache", CircuitState::Closed, CircuitState::Open)
                .is_ok());
            assert!(observer.on_cache_hit("k").is_ok());
            assert!(observer.on_cache_miss("k").is_ok());
        }
    }

    #[test]
    fn test_prometheus_recorder_installation() {
        // The recorder is process-global; a second install must fail cleanly.
        match install_prometheus_recorder() {
            Ok(handle) => {
                TelemetryObserver.on_cache_hit("k").unwrap();
                assert!(handle.render().contains("sdk_cache_requests_total"));
                assert!(install_prometheus_recorder().is_err());
            }
            Err(e) => assert!(e.to_string().contains("recorder")),
        }
    }
}
