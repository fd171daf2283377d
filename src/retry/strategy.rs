use super::budget::RetryBudget;
use crate::error::ClassifiedError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Upper bound on the computed delay in milliseconds
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Growth factor between attempts
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of the delay applied as symmetric random jitter
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default)]
    pub budget: RetryBudget,
}

/// Linear (fixed interval, jittered) backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearBackoff {
    #[serde(default = "default_initial_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,

    #[serde(default)]
    pub budget: RetryBudget,
}

/// Constant backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantBackoff {
    #[serde(default = "default_initial_interval_ms")]
    pub interval_ms: u64,

    #[serde(default)]
    pub budget: RetryBudget,
}

fn default_initial_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

/// How long to wait between attempts and which failures are worth retrying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryStrategy {
    Exponential(ExponentialBackoff),
    Linear(LinearBackoff),
    Constant(ConstantBackoff),
    NoRetry,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential(ExponentialBackoff {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            budget: RetryBudget::default(),
        })
    }
}

/// Never-retry strategies still answer `budget()`
static NO_RETRY_BUDGET: OnceLock<RetryBudget> = OnceLock::new();

impl RetryStrategy {
    pub fn exponential(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        budget: RetryBudget,
    ) -> Self {
        RetryStrategy::Exponential(ExponentialBackoff {
            initial_interval_ms: initial.as_millis() as u64,
            max_interval_ms: max.as_millis() as u64,
            multiplier,
            jitter,
            budget,
        })
    }

    pub fn linear(interval: Duration, jitter: f64, budget: RetryBudget) -> Self {
        RetryStrategy::Linear(LinearBackoff {
            interval_ms: interval.as_millis() as u64,
            jitter,
            budget,
        })
    }

    pub fn constant(interval: Duration, budget: RetryBudget) -> Self {
        RetryStrategy::Constant(ConstantBackoff {
            interval_ms: interval.as_millis() as u64,
            budget,
        })
    }

    pub fn no_retry() -> Self {
        RetryStrategy::NoRetry
    }

    /// The budget carried by this strategy
    pub fn budget(&self) -> &RetryBudget {
        match self {
            RetryStrategy::Exponential(b) => &b.budget,
            RetryStrategy::Linear(b) => &b.budget,
            RetryStrategy::Constant(b) => &b.budget,
            RetryStrategy::NoRetry => {
                NO_RETRY_BUDGET.get_or_init(|| RetryBudget::with_max_attempts(1))
            }
        }
    }

    /// Delay before attempt number `attempt + 1`, where `attempt` starts at 1
    pub fn next_interval(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Exponential(b) => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let base = b.initial_interval_ms as f64 * b.multiplier.powi(exponent);
                let capped = base.min(b.max_interval_ms as f64);
                with_jitter(capped, b.jitter)
            }
            RetryStrategy::Linear(b) => with_jitter(b.interval_ms as f64, b.jitter),
            RetryStrategy::Constant(b) => Duration::from_millis(b.interval_ms),
            RetryStrategy::NoRetry => Duration::ZERO,
        }
    }

    /// Whether `error` may be retried; attempt and time caps are checked by the executor
    pub fn should_retry(&self, error: &ClassifiedError, _attempt: u32) -> bool {
        match self {
            RetryStrategy::NoRetry => false,
            _ => self.budget().allows(error),
        }
    }

    pub(crate) fn jitter(&self) -> Option<f64> {
        match self {
            RetryStrategy::Exponential(b) => Some(b.jitter),
            RetryStrategy::Linear(b) => Some(b.jitter),
            _ => None,
        }
    }

    pub(crate) fn multiplier(&self) -> Option<f64> {
        match self {
            RetryStrategy::Exponential(b) => Some(b.multiplier),
            _ => None,
        }
    }
}

/// `delay + delay * jitter * U(-1, 1)`, clamped at zero
fn with_jitter(delay_ms: f64, jitter: f64) -> Duration {
    let mut delay = delay_ms;
    if jitter > 0.0 && delay > 0.0 {
        let factor: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        delay += delay * jitter * factor;
    }
    Duration::from_nanos((delay.max(0.0) * 1_000_000.0).round() as u64)
}
