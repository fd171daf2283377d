use super::{Observer, ObserverResult};
use crate::circuit_breaker::CircuitState;
use crate::error::ClassifiedError;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Latency samples kept per endpoint unless configured otherwise
pub const DEFAULT_LATENCY_WINDOW: usize = 1024;

/// In-memory metrics observer keyed by `"METHOD PATH"`.
///
/// Counters cover every event since creation or the last reset. Latency
/// statistics cover only the most recent `latency_window` requests of each
/// endpoint; older samples are evicted first.
#[derive(Debug)]
pub struct MetricsCollector {
    inner: RwLock<Inner>,
    latency_window: usize,
}

#[derive(Debug, Default)]
struct Inner {
    request_counts: HashMap<String, u64>,
    latencies: HashMap<String, VecDeque<Duration>>,
    error_counts: HashMap<String, u64>,
    retry_counts: HashMap<String, u64>,
    cache_hits: u64,
    cache_misses: u64,
    circuit_transitions: u64,
}

/// Per-endpoint view inside a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub errors: u64,
    pub retries: u64,
    pub error_rate: f64,
    pub avg_latency: Duration,
    pub p50_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
}

/// Point-in-time copy of the collector; later events never change it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub endpoints: HashMap<String, EndpointMetrics>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub circuit_transitions: u64,
}

impl MetricsSnapshot {
    pub fn endpoint(&self, method: &str, path: &str) -> Option<&EndpointMetrics> {
        self.endpoints.get(&endpoint_key(method, path))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn endpoint_key(method: &str, path: &str) -> String {
    format!("{} {}", method, path)
}

/// Value at `floor(len * p)` of a sorted slice, clamped to the last element
pub(crate) fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let index = ((sorted.len() as f64) * p).floor() as usize;
    sorted[index.min(sorted.len() - 1)]
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_latency_window(DEFAULT_LATENCY_WINDOW)
    }

    /// Collector keeping at most `window` latency samples per endpoint
    pub fn with_latency_window(window: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            latency_window: window.max(1),
        }
    }

    pub fn latency_window(&self) -> usize {
        self.latency_window
    }

    /// Deep copy of the current counters with derived statistics
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let inner = self.inner.read();

        let endpoints = inner
            .request_counts
            .iter()
            .map(|(key, &requests)| {
                let errors = inner.error_counts.get(key).copied().unwrap_or(0);
                let retries = inner.retry_counts.get(key).copied().unwrap_or(0);

                let mut sorted: Vec<Duration> = inner
                    .latencies
                    .get(key)
                    .map(|samples| samples.iter().copied().collect())
                    .unwrap_or_default();
                sorted.sort_unstable();

                let avg_latency = if sorted.is_empty() {
                    Duration::ZERO
                } else {
                    sorted.iter().sum::<Duration>() / sorted.len() as u32
                };
                let error_rate = if requests == 0 {
                    0.0
                } else {
                    errors as f64 / requests as f64
                };

                let metrics = EndpointMetrics {
                    requests,
                    errors,
                    retries,
                    error_rate,
                    avg_latency,
                    p50_latency: percentile(&sorted, 0.50),
                    p95_latency: percentile(&sorted, 0.95),
                    p99_latency: percentile(&sorted, 0.99),
                };
                (key.clone(), metrics)
            })
            .collect();

        let lookups = inner.cache_hits + inner.cache_misses;
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.cache_hits as f64 / lookups as f64
        };

        MetricsSnapshot {
            endpoints,
            cache_hits: inner.cache_hits,
            cache_misses: inner.cache_misses,
            cache_hit_rate,
            circuit_transitions: inner.circuit_transitions,
        }
    }

    /// Clear every counter
    pub fn reset(&self) {
        *self.inner.write() = Inner::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for MetricsCollector {
    fn on_request_start(&self, method: &str, path: &str) -> ObserverResult {
        let mut inner = self.inner.write();
        *inner
            .request_counts
            .entry(endpoint_key(method, path))
            .or_insert(0) += 1;
        Ok(())
    }

    fn on_request_end(
        &self,
        method: &str,
        path: &str,
        duration: Duration,
        error: Option<&ClassifiedError>,
    ) -> ObserverResult {
        let key = endpoint_key(method, path);
        let mut inner = self.inner.write();
        let samples = inner.latencies.entry(key.clone()).or_default();
        if samples.len() == self.latency_window {
            samples.pop_front();
        }
        samples.push_back(duration);
        if error.is_some() {
            *inner.error_counts.entry(key).or_insert(0) += 1;
        }
        Ok(())
    }

    fn on_retry_attempt(
        &self,
        method: &str,
        path: &str,
        _attempt: u32,
        _error: &ClassifiedError,
    ) -> ObserverResult {
        let mut inner = self.inner.write();
        *inner
            .retry_counts
            .entry(endpoint_key(method, path))
            .or_insert(0) += 1;
        Ok(())
    }

    fn on_circuit_state_change(
        &self,
        _name: &str,
        _from: CircuitState,
        _to: CircuitState,
    ) -> ObserverResult {
        self.inner.write().circuit_transitions += 1;
        Ok(())
    }

    fn on_cache_hit(&self, _key: &str) -> ObserverResult {
        self.inner.write().cache_hits += 1;
        Ok(())
    }

    fn on_cache_miss(&self, _key: &str) -> ObserverResult {
        self.inner.write().cache_misses += 1;
        Ok(())
    }
}
