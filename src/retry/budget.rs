use crate::error::{ClassifiedError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Cap on retry attempts and elapsed time for one logical operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Maximum number of attempts, first attempt included (0 = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum elapsed time across all attempts in milliseconds (0 = unlimited)
    #[serde(default)]
    pub max_duration_ms: u64,

    /// Error kinds eligible for retry (empty = every retryable kind)
    #[serde(default)]
    pub allowed_error_kinds: HashSet<ErrorKind>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_duration_ms: 0,
            allowed_error_kinds: HashSet::new(),
        }
    }
}

impl RetryBudget {
    /// Budget with an attempt cap and no time or kind restriction
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Budget with neither an attempt nor a time cap
    pub fn unlimited() -> Self {
        Self::with_max_attempts(0)
    }

    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration_ms = max_duration.as_millis() as u64;
        self
    }

    pub fn allow_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.allowed_error_kinds.extend(kinds);
        self
    }

    pub fn max_duration_limit(&self) -> Option<Duration> {
        (self.max_duration_ms > 0).then(|| Duration::from_millis(self.max_duration_ms))
    }

    /// Whether no further attempt may start after `attempts` attempts and `elapsed` time
    pub fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        if self.max_attempts > 0 && attempts >= self.max_attempts {
            return true;
        }
        match self.max_duration_limit() {
            Some(limit) => elapsed >= limit,
            None => false,
        }
    }

    /// Retryable flag set and kind allowed by this budget
    pub fn allows(&self, error: &ClassifiedError) -> bool {
        error.is_retryable()
            && (self.allowed_error_kinds.is_empty()
                || self.allowed_error_kinds.contains(&error.kind()))
    }
}
