//! Producer side: validate outgoing email and enqueue it.

use courier::{CourierError, Job, JobQueue, Store};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

/// Content type applied when a message does not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// An email waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// MIME content type of the body.
    #[serde(default)]
    pub content_type: String,
    /// Extra headers written into the message. Entries with a blank name are skipped.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl EmailMessage {
    /// Plain-text message to one recipient.
    #[must_use]
    pub fn text(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            body: body.into(),
            content_type: String::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Errors returned by [`EmailOutbox::enqueue`].
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The message is incomplete.
    #[error("email rejected: {0}")]
    Invalid(&'static str),

    /// The queue could not accept the job.
    #[error(transparent)]
    Queue(#[from] CourierError),
}

/// Accepts messages from request handlers and queues them for the worker.
#[derive(Debug, Clone)]
pub struct EmailOutbox<S> {
    queue: JobQueue<S>,
}

impl<S: Store> EmailOutbox<S> {
    /// Outbox writing to `queue`.
    #[must_use]
    pub const fn new(queue: JobQueue<S>) -> Self {
        Self { queue }
    }

    /// Validate `message`, fill in defaults and enqueue it. Returns the queued job.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Invalid`] when a recipient, the subject or the body is
    /// missing, and [`OutboxError::Queue`] when the store rejects the push.
    pub async fn enqueue(&self, message: EmailMessage) -> Result<Job<EmailMessage>, OutboxError> {
        let message = normalize(message)?;
        let job = self.queue.enqueue(message).await?;
        info!(job_id = %job.id, recipients = job.payload.to.len(), "email queued");
        Ok(job)
    }
}

fn normalize(mut message: EmailMessage) -> Result<EmailMessage, OutboxError> {
    message.to = message
        .to
        .into_iter()
        .map(|to| to.trim().to_string())
        .filter(|to| !to.is_empty())
        .collect();
    if message.to.is_empty() {
        return Err(OutboxError::Invalid("recipient is empty"));
    }
    if message.subject.trim().is_empty() {
        return Err(OutboxError::Invalid("subject is empty"));
    }
    if message.body.trim().is_empty() {
        return Err(OutboxError::Invalid("body is empty"));
    }
    if message.content_type.trim().is_empty() {
        message.content_type = DEFAULT_CONTENT_TYPE.to_string();
    }
    Ok(message)
}
