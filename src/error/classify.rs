use super::{Cancelled, ClassifiedError, ErrorKind};
use std::error::Error;

/// Classify an arbitrary error by walking its source chain.
///
/// An existing `ClassifiedError` anywhere in the chain wins. Otherwise the
/// first recognised cause decides the kind; unknown failures are treated as
/// network errors.
pub fn classify(err: &(dyn Error + 'static)) -> ClassifiedError {
    let mut current: Option<&(dyn Error + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(classified) = e.downcast_ref::<ClassifiedError>() {
            return classified.clone();
        }
        if let Some(kind) = kind_of(e) {
            return ClassifiedError::new(kind, err.to_string());
        }
        current = e.source();
    }

    ClassifiedError::new(ErrorKind::Network, err.to_string())
}

fn kind_of(e: &(dyn Error + 'static)) -> Option<ErrorKind> {
    if e.is::<Cancelled>() || e.is::<tokio::time::error::Elapsed>() {
        return Some(ErrorKind::Timeout);
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return Some(match io.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Network,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("transport failed")]
    struct Transport(#[source] std::io::Error);

    #[test]
    fn test_io_errors() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify(&refused).kind(), ErrorKind::Network);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify(&timed_out).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_walks_source_chain() {
        let err = Transport(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        let classified = classify(&err);
        assert_eq!(classified.kind(), ErrorKind::Timeout);
        assert_eq!(classified.message(), "transport failed");
    }

    #[test]
    fn test_existing_classification_is_kept() {
        let original = ClassifiedError::rate_limited("slow down").with_code(429);
        let classified = classify(&original);
        assert_eq!(classified.kind(), ErrorKind::RateLimit);
        assert_eq!(classified.code(), Some(429));
    }

    #[tokio::test]
    async fn test_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(classify(&elapsed).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_unknown_is_network() {
        let err = std::fmt::Error;
        assert_eq!(classify(&err).kind(), ErrorKind::Network);
    }
}
