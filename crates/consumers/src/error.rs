//! Consumer error types.

use message_store::StoreError;
use thiserror::Error;

/// Why a consumer could not process a message.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The message can never be processed; retrying is pointless.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Worth another attempt.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The payload does not decode; treated as permanent.
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ConsumerError {
    pub fn permanent(reason: impl Into<String>) -> Self {
        ConsumerError::Permanent(reason.into())
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        ConsumerError::Transient(reason.into())
    }

    /// Permanent failures skip retries and go straight to the dead-letter
    /// store. Everything else is retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ConsumerError::Permanent(_) | ConsumerError::Malformed(_))
    }
}

/// Errors from replaying a dead-lettered message.
#[derive(Debug, Error)]
pub enum RetryDeadLetterError {
    #[error("Dead letter not found: {queue}#{sequence}")]
    NotFound { queue: String, sequence: i64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RetryDeadLetterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetryDeadLetterError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_and_malformed_failures_are_permanent() {
        assert!(ConsumerError::permanent("bad").is_permanent());
        let malformed = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(ConsumerError::from(malformed).is_permanent());

        assert!(!ConsumerError::transient("timeout").is_permanent());
        assert!(!ConsumerError::from(StoreError::Unavailable("db".into())).is_permanent());
    }

    #[test]
    fn not_found_display_names_the_address() {
        let err = RetryDeadLetterError::NotFound {
            queue: "orders-queue".into(),
            sequence: 42,
        };
        assert_eq!(err.to_string(), "Dead letter not found: orders-queue#42");
        assert!(err.is_not_found());
    }
}
