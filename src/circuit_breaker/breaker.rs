use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::ClassifiedError;
use crate::observer::{guarded, Observer};
use parking_lot::Mutex;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A `(from, to)` pair applied under the breaker lock
type Transition = (CircuitState, CircuitState);

/// Circuit breaker protecting a single downstream resource
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Counters and state, guarded together; never held across an await
    state: Mutex<State>,
    /// Resource identifier used in logs and observer callbacks
    name: String,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Consecutive failures while closed
    consecutive_failures: u32,
    /// Consecutive trial successes while half-open
    consecutive_successes: u32,
    /// Trial calls admitted and still running in the current half-open episode
    half_open_in_flight: u32,
    /// Bumped on every transition and reset
    episode: u64,
    /// Time of the most recent recorded failure
    last_failure_at: Option<Instant>,
    /// Time of the most recent state transition
    last_transition_at: Instant,
    /// Transitions applied since the last drain
    transitions: Vec<Transition>,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

impl State {
    fn new() -> Self {
        Self {
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            episode: 0,
            last_failure_at: None,
            last_transition_at: Instant::now(),
            transitions: Vec::new(),
            metrics: CircuitBreakerMetrics::default(),
        }
    }

    fn clear_counters(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
    }

    fn move_to(&mut self, to: CircuitState) {
        let from = self.circuit_state;
        self.circuit_state = to;
        self.last_transition_at = Instant::now();
        self.episode += 1;
        self.clear_counters();
        self.transitions.push((from, to));
    }
}

/// Admission to run the operation once.
///
/// Settled under the lock with the operation's outcome. Dropped unsettled
/// (the caller stopped polling) it records the call as abandoned and hands
/// back its half-open trial slot.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    episode: u64,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.breaker.state.lock();
        state.metrics.abandoned_requests += 1;
        self.breaker.release_trial_slot(&mut state, self.episode, self.trial);
        debug!(
            breaker = %self.breaker.name,
            trial = self.trial,
            "Call abandoned before completion"
        );
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            open_timeout_ms = config.open_timeout_ms,
            half_open_max_requests = config.half_open_max_requests,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: Mutex::new(State::new()),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker.
    ///
    /// The operation runs outside the lock; its outcome is recorded back
    /// afterwards. Rejected calls fail with a `circuit_open` error and never
    /// invoke the operation.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.execute_observed(None, operation).await
    }

    /// Current state, moving Open to HalfOpen once the open timeout elapsed
    pub async fn state(&self) -> CircuitState {
        self.state_observed(None)
    }

    /// Force the breaker closed and zero all counters
    pub async fn reset(&self) {
        self.reset_observed(None)
    }

    /// Get metrics
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.lock().metrics.clone()
    }

    /// `execute`, reporting every transition it applies to `observer`
    pub(crate) async fn execute_observed<F, Fut, T>(
        &self,
        observer: Option<&dyn Observer>,
        operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut permit = self.try_acquire(observer)?;

        let result = operation().await;

        permit.settled = true;
        let transitions = {
            let mut state = self.state.lock();
            self.release_trial_slot(&mut state, permit.episode, permit.trial);
            if permit.episode == state.episode {
                match &result {
                    Ok(_) => self.record_success(&mut state),
                    Err(e) => self.record_failure(&mut state, e),
                }
            } else {
                self.record_stale(&mut state, result.is_ok());
            }
            std::mem::take(&mut state.transitions)
        };
        self.report(observer, &transitions);

        result
    }

    pub(crate) fn state_observed(&self, observer: Option<&dyn Observer>) -> CircuitState {
        let (current, transitions) = {
            let mut state = self.state.lock();
            self.maybe_half_open(&mut state);
            (state.circuit_state, std::mem::take(&mut state.transitions))
        };
        self.report(observer, &transitions);
        current
    }

    pub(crate) fn reset_observed(&self, observer: Option<&dyn Observer>) {
        let transitions = {
            let mut state = self.state.lock();
            info!(breaker = %self.name, from = %state.circuit_state, "Circuit breaker reset");
            if state.circuit_state == CircuitState::Closed {
                state.episode += 1;
                state.clear_counters();
            } else {
                state.move_to(CircuitState::Closed);
            }
            state.last_failure_at = None;
            std::mem::take(&mut state.transitions)
        };
        self.report(observer, &transitions);
    }

    fn report(&self, observer: Option<&dyn Observer>, transitions: &[Transition]) {
        let Some(observer) = observer else {
            return;
        };
        for &(from, to) in transitions {
            guarded("on_circuit_state_change", || {
                observer.on_circuit_state_change(&self.name, from, to)
            });
        }
    }

    /// Admit or reject a call
    fn try_acquire(&self, observer: Option<&dyn Observer>) -> Result<Permit<'_>, ClassifiedError> {
        let (admission, transitions) = {
            let mut state = self.state.lock();
            self.maybe_half_open(&mut state);
            let admission = self.admit(&mut state);
            (admission, std::mem::take(&mut state.transitions))
        };
        self.report(observer, &transitions);
        admission
    }

    fn admit(&self, state: &mut State) -> Result<Permit<'_>, ClassifiedError> {
        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_requests += 1;
                Ok(self.permit(state.episode, false))
            }
            CircuitState::Open => {
                state.metrics.rejected_requests += 1;
                debug!(
                    breaker = %self.name,
                    time_remaining = ?self
                        .config
                        .open_timeout()
                        .saturating_sub(state.last_transition_at.elapsed()),
                    "Circuit breaker open, rejecting request"
                );
                Err(ClassifiedError::circuit_open(&self.name))
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight < self.config.half_open_max_requests {
                    state.half_open_in_flight += 1;
                    state.metrics.total_requests += 1;
                    debug!(
                        breaker = %self.name,
                        in_flight = state.half_open_in_flight,
                        max = self.config.half_open_max_requests,
                        "Allowing half-open trial request"
                    );
                    Ok(self.permit(state.episode, true))
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        breaker = %self.name,
                        "Max half-open requests in flight, rejecting"
                    );
                    Err(ClassifiedError::circuit_open(&self.name))
                }
            }
        }
    }

    fn permit(&self, episode: u64, trial: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            episode,
            trial,
            settled: false,
        }
    }

    fn release_trial_slot(&self, state: &mut State, episode: u64, trial: bool) {
        if trial && episode == state.episode && state.circuit_state == CircuitState::HalfOpen {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
    }

    fn record_success(&self, state: &mut State) {
        state.metrics.successful_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;

                debug!(
                    breaker = %self.name,
                    consecutive_successes = state.consecutive_successes,
                    threshold = self.config.success_threshold,
                    "Half-open trial request succeeded"
                );

                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition_to_closed(state);
                }
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Recording success in open state");
            }
        }
    }

    fn record_failure(&self, state: &mut State, error: &ClassifiedError) {
        state.metrics.failed_requests += 1;
        state.last_failure_at = Some(Instant::now());

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                debug!(
                    breaker = %self.name,
                    consecutive_failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    error = %error,
                    "Request failed in closed state"
                );

                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to_open(state);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    breaker = %self.name,
                    error = %error,
                    "Half-open trial request failed, reopening circuit"
                );
                self.transition_to_open(state);
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Recording failure in open state");
            }
        }
    }

    /// Outcome of a call admitted before the latest transition; it only
    /// counts towards metrics
    fn record_stale(&self, state: &mut State, success: bool) {
        if success {
            state.metrics.successful_requests += 1;
        } else {
            state.metrics.failed_requests += 1;
            state.last_failure_at = Some(Instant::now());
        }
        debug!(
            breaker = %self.name,
            state = %state.circuit_state,
            success,
            "Ignoring outcome of call admitted before the last transition"
        );
    }

    fn maybe_half_open(&self, state: &mut State) {
        if state.circuit_state == CircuitState::Open
            && state.last_transition_at.elapsed() >= self.config.open_timeout()
        {
            self.transition_to_half_open(state);
        }
    }

    fn transition_to_open(&self, state: &mut State) {
        info!(
            breaker = %self.name,
            consecutive_failures = state.consecutive_failures,
            "Circuit breaker opening"
        );

        state.move_to(CircuitState::Open);
        state.metrics.circuit_opened_count += 1;
    }

    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            breaker = %self.name,
            open_timeout = ?self.config.open_timeout(),
            "Circuit breaker transitioning to half-open"
        );

        state.move_to(CircuitState::HalfOpen);
        state.metrics.circuit_half_opened_count += 1;
    }

    fn transition_to_closed(&self, state: &mut State) {
        info!(
            breaker = %self.name,
            consecutive_successes = state.consecutive_successes,
            "Circuit breaker closing"
        );

        state.move_to(CircuitState::Closed);
        state.metrics.circuit_closed_count += 1;
    }
}
