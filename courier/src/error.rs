//! Error types for the queue, worker and idempotency primitives.

use thiserror::Error;

/// Errors raised by a [`Store`](crate::store::Store) adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis server rejected or failed a command.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something the adapter cannot interpret.
    #[error("unexpected store response: {0}")]
    UnexpectedResponse(String),
}

/// Errors surfaced by the job queue and the idempotency lock.
///
/// `QueueEmpty` and `InProgress` describe expected conditions rather than faults;
/// use [`CourierError::is_queue_empty`] and [`CourierError::is_in_progress`] to branch
/// on them without matching every variant.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The store failed; propagate and let the caller retry later.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// No pending entry arrived before the reservation timeout.
    #[error("queue is empty")]
    QueueEmpty,

    /// A reserved entry could not be decoded. `raw` must be dead-lettered.
    #[error("queue payload is invalid: {reason}")]
    InvalidPayload {
        /// The exact entry as read from the store.
        raw: String,
        /// Decoder message.
        reason: String,
    },

    /// Another caller holds the pending claim for this key.
    #[error("operation already in progress for key {0}")]
    InProgress(String),

    /// The job was never reserved, so there is no entry to remove.
    #[error("job {0} has not been reserved")]
    NotReserved(String),

    /// A job could not be serialised.
    #[error("failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    /// A caller supplied an unusable argument (empty key, reserved value).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl CourierError {
    /// Returns true for the expected "nothing to reserve" outcome.
    #[must_use]
    pub const fn is_queue_empty(&self) -> bool {
        matches!(self, Self::QueueEmpty)
    }

    /// Returns true when an idempotency claim is held by someone else.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress(_))
    }

    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::QueueEmpty | Self::InProgress(_)
        )
    }
}

/// Result alias for store adapter calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for queue and lock operations.
pub type CourierResult<T> = Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_conditions_are_transient() {
        assert!(CourierError::QueueEmpty.is_transient());
        assert!(CourierError::QueueEmpty.is_queue_empty());
        assert!(CourierError::InProgress("k".into()).is_in_progress());
        assert!(
            CourierError::StoreUnavailable(StoreError::Unavailable("down".into())).is_transient()
        );
    }

    #[test]
    fn test_poison_and_misuse_are_not_transient() {
        let poison = CourierError::InvalidPayload {
            raw: "{".into(),
            reason: "EOF".into(),
        };
        assert!(!poison.is_transient());
        assert!(!CourierError::NotReserved("abc".into()).is_transient());
        assert!(!CourierError::InvalidArgument("empty key").is_transient());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(CourierError::QueueEmpty.to_string(), "queue is empty");
        assert_eq!(
            CourierError::InProgress("payment:x".into()).to_string(),
            "operation already in progress for key payment:x"
        );
    }
}
