pub mod classify;

pub use classify::classify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for configuration and setup operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors raised while building the resilience core
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Cause attached to errors produced by a cancelled caller
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Failure taxonomy used to drive retry and circuit decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection level failure (refused, reset, DNS)
    Network,
    /// Deadline exceeded or caller cancelled
    Timeout,
    /// 5xx response
    Server,
    /// 4xx response other than 429
    Client,
    /// 429 response
    RateLimit,
    /// Request rejected before it was sent
    Validation,
    /// Rejected by an open circuit breaker
    CircuitOpen,
    /// Retry budget exhausted
    RetryBudget,
}

impl ErrorKind {
    /// Whether errors of this kind are retried by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server | ErrorKind::RateLimit
        )
    }

    /// Map an HTTP status code onto the taxonomy
    pub fn from_status(code: u16) -> Self {
        match code {
            429 => ErrorKind::RateLimit,
            408 | 504 => ErrorKind::Timeout,
            400..=499 => ErrorKind::Client,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Network,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Validation => "validation",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RetryBudget => "retry_budget",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request details attached to a classified error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub url: Option<String>,
    pub method: Option<String>,
    pub retry_count: u32,
    pub elapsed: Duration,
}

impl ErrorContext {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            method: Some(method.into()),
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// An error annotated with a taxonomy kind and a retryable flag.
///
/// Created where a failure is first observed and not mutated afterwards;
/// the builder methods consume `self`. Cloning shares the wrapped cause.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    kind: ErrorKind,
    code: Option<u16>,
    message: String,
    retryable: bool,
    timestamp: DateTime<Utc>,
    context: Option<ErrorContext>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ClassifiedError {
    /// Create an error with the kind's default retryability
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            retryable: kind.is_retryable(),
            timestamp: Utc::now(),
            context: None,
            source: None,
        }
    }

    /// Create an error from an HTTP status code
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::from_status(code), message);
        err.code = Some(code);
        err
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn circuit_open(name: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker '{}' is open", name),
        )
    }

    /// Timeout-classified error wrapping a caller cancellation
    pub fn cancelled(context: Option<ErrorContext>) -> Self {
        let mut err = Self::timeout("operation cancelled by caller").with_source(Cancelled);
        err.context = context;
        err
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Override the default retryability of the kind
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        self.context.as_ref()
    }

    /// Whether this error was produced by a caller cancellation
    pub fn is_cancellation(&self) -> bool {
        self.source
            .as_deref()
            .map(|s| s.is::<Cancelled>())
            .unwrap_or(false)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}:{}] {}", self.kind, code, self.message)?,
            None => write!(f, "[{}] {}", self.kind, self.message)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_default_retryability() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Server.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::Client.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
        assert!(!ErrorKind::RetryBudget.is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::Client);
        assert_eq!(ErrorKind::from_status(408), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Server);

        let err = ClassifiedError::from_status(502, "bad gateway");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.code(), Some(502));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancelled_is_timeout_with_cause() {
        let err = ClassifiedError::cancelled(None);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_cancellation());
        assert!(err.source().unwrap().is::<Cancelled>());
    }

    #[test]
    fn test_error_display() {
        let err = ClassifiedError::from_status(503, "unavailable");
        assert_eq!(err.to_string(), "[server:503] unavailable");

        let err = ClassifiedError::circuit_open("cache-eu");
        assert_eq!(
            err.to_string(),
            "[circuit_open] circuit breaker 'cache-eu' is open"
        );
    }

    #[test]
    fn test_retryable_override_and_context() {
        let err = ClassifiedError::server("boom")
            .with_retryable(false)
            .with_context(ErrorContext::new("GET", "/v1/cache/k").with_retry_count(2));
        assert!(!err.is_retryable());
        let ctx = err.context().unwrap();
        assert_eq!(ctx.method.as_deref(), Some("GET"));
        assert_eq!(ctx.retry_count, 2);
    }
}
