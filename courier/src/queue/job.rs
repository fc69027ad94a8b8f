//! The unit of deferred work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queued unit of work carrying a producer-defined payload.
///
/// Entries are stored as JSON. The exact string read by
/// [`JobQueue::reserve`](super::JobQueue::reserve) is kept alongside the decoded job and
/// used as the removal token for ack, retry and dead-letter, so a job re-serialised with
/// different field order or timestamps still removes the entry that was reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job<P> {
    /// Random 32-character lowercase hex identifier.
    pub id: String,
    /// Producer payload.
    #[serde(rename = "message")]
    pub payload: P,
    /// Delivery attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// Per-job attempt ceiling; 0 defers to the worker default.
    #[serde(default)]
    pub max_attempts: u32,
    /// Failure text from the latest attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the job was first enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job was last modified.
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    raw: Option<String>,
}

impl<P> Job<P> {
    /// Create a job with a fresh ID and no attempts.
    #[must_use]
    pub fn new(payload: P) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            payload,
            attempts: 0,
            max_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            raw: None,
        }
    }

    /// Override the worker's attempt ceiling for this job.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The entry this job was reserved from, if it was reserved.
    #[must_use]
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Attempt ceiling for this job given the worker default.
    #[must_use]
    pub const fn effective_max_attempts(&self, default: u32) -> u32 {
        if self.max_attempts > 0 {
            self.max_attempts
        } else {
            default
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_raw(&mut self, raw: String) {
        self.raw = Some(raw);
    }
}
