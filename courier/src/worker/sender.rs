//! Delivery capability injected into the worker.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Performs the side effect for one job payload.
///
/// Errors are opaque: their display text is stored as the job's last error. The worker
/// bounds each call with its send timeout and treats an elapsed timeout as a failure.
/// Returning a [`PermanentFailure`] skips the remaining attempts.
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    /// Payload type carried by queued jobs.
    type Payload: Send + Sync;

    /// Deliver one payload.
    async fn send(&self, payload: &Self::Payload) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: Sender> Sender for Arc<T> {
    type Payload = T::Payload;

    async fn send(&self, payload: &Self::Payload) -> anyhow::Result<()> {
        (**self).send(payload).await
    }
}

/// A send failure that another attempt cannot fix, such as a payload the relay will
/// never accept. The worker dead-letters the job on the first one.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PermanentFailure(pub String);

impl PermanentFailure {
    /// Wrap any error's message.
    #[must_use]
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failure_survives_context() {
        let error = anyhow::Error::from(PermanentFailure::new("bad recipient"))
            .context("building message");
        assert!(error.downcast_ref::<PermanentFailure>().is_some());
        assert_eq!(error.root_cause().to_string(), "bad recipient");
    }
}
