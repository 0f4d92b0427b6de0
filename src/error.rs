//! Error taxonomies for each layer of the issuance path.
//!
//! Fail-fast, typed errors: the decision store, the log producer and the
//! durable writer each surface their own error kind, and the issuance
//! service folds them into one [`IssueError`] that the HTTP layer maps onto
//! status codes.

use crate::types::EventId;
use thiserror::Error;

/// Failures of the in-memory decision store, distinct from the three
/// business FAIL verdicts (which are data, not errors).
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Connection or cluster failure before the script could be evaluated.
    #[error("decision store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but with a reply the client cannot interpret.
    #[error("decision script returned a malformed reply: {0}")]
    Script(String),
}

/// Failures of the event log producer.
#[derive(Debug, Error, Clone)]
pub enum ProduceError {
    /// Producer could not be created or the cluster is unreachable.
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    /// Delivery was not acknowledged within the retry budget.
    #[error("publish to {topic} failed: {reason}")]
    Delivery {
        /// Target topic
        topic: String,
        /// Broker-reported reason
        reason: String,
    },
}

/// Issuance-path error; the server layer maps each variant onto an HTTP
/// status.
#[derive(Debug, Error)]
pub enum IssueError {
    /// Malformed request input; maps to 400.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Stock key absent: initialization is an explicit admin action, never
    /// performed implicitly on first issuance. Maps to 503.
    #[error("stock not initialized for event {0}")]
    StockNotInitialized(EventId),

    /// The store failed before a decision was made; the request is safe to
    /// retry. Maps to 503.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The decision passed but durability could not be achieved within the
    /// retry budget. `compensated` records whether the in-memory PASS was
    /// rolled back; when it was not, reconciliation picks up the drift.
    /// Maps to 503 either way.
    #[error("publish failed after decision (compensated: {compensated}): {source}")]
    PublishFailed {
        /// Whether the compensating script succeeded
        compensated: bool,
        /// The underlying producer error
        source: ProduceError,
    },

    /// The request deadline elapsed before the decision ran.
    #[error("request deadline exceeded before decision")]
    DeadlineExceeded,

    /// Task plumbing failure; should not happen in steady state.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures while persisting a consumed log record.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Worth retrying with backoff: connection loss, pool exhaustion,
    /// serialization conflicts.
    #[error("transient database error: {0}")]
    Transient(String),

    /// Retrying will not help: schema drift, malformed data.
    #[error("permanent database error: {0}")]
    Permanent(String),
}

impl PersistError {
    /// Classify an sqlx error for the writer's retry policy.
    ///
    /// Unique violations never reach this point: the writer resolves them
    /// as already-applied rows before classification.
    #[must_use]
    pub fn classify(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Transient(err.to_string()),
            sqlx::Error::Database(db) => {
                // 40001 serialization_failure, 40P01 deadlock_detected,
                // 57P03 cannot_connect_now
                let transient = db
                    .code()
                    .map(|code| matches!(code.as_ref(), "40001" | "40P01" | "57P03"))
                    .unwrap_or(false);
                if transient {
                    Self::Transient(err.to_string())
                } else {
                    Self::Permanent(err.to_string())
                }
            }
            _ => Self::Permanent(err.to_string()),
        }
    }

    /// Whether the writer should retry this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(PersistError::classify(&err).is_transient());
    }

    #[test]
    fn decode_errors_are_permanent() {
        let err = sqlx::Error::RowNotFound;
        assert!(!PersistError::classify(&err).is_transient());
    }
}
