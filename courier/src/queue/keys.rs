//! Store key layout for one queue.

/// Prefix used when none (or a blank one) is supplied.
pub const DEFAULT_PREFIX: &str = "email:queue";

/// The four Store keys backing a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// List of jobs waiting to be reserved.
    pub pending: String,
    /// List of reserved, unacknowledged jobs.
    pub processing: String,
    /// Sorted set of jobs waiting for their retry time, scored by due Unix seconds.
    pub retry: String,
    /// List of jobs that will not be attempted again.
    pub dead: String,
}

impl QueueKeys {
    /// Derive keys from `prefix`, falling back to [`DEFAULT_PREFIX`] when it is blank.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let prefix = match prefix.trim() {
            "" => DEFAULT_PREFIX,
            trimmed => trimmed,
        };
        Self {
            pending: format!("{prefix}:pending"),
            processing: format!("{prefix}:processing"),
            retry: format!("{prefix}:retry"),
            dead: format!("{prefix}:dead"),
        }
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
