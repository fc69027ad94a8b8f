//! Retry delay table.

use std::time::Duration;

/// Delays used when no table is configured: 10s, 30s, 1m, 5m.
pub const DEFAULT_RETRY_DELAYS: [Duration; 4] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(300),
];

const EXTRA_STEP: Duration = Duration::from_secs(60);

/// Maps an attempt count to the delay before the next attempt.
///
/// Attempt `n` (1-based) waits `table[n - 1]`. Past the end of the table each extra
/// attempt adds one minute to the last entry, so with the default table attempt 6
/// waits 5m + 2m = 7m.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Policy over `delays`; an empty table falls back to [`DEFAULT_RETRY_DELAYS`].
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        if delays.is_empty() {
            Self::default()
        } else {
            Self { delays }
        }
    }

    /// The configured table.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay before retrying after `attempt` failed attempts.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let len = self.delays.len();
        let Some(&last) = self.delays.last() else {
            return DEFAULT_RETRY_DELAYS[0];
        };
        let attempt = usize::try_from(attempt).unwrap_or(usize::MAX);
        if attempt == 0 {
            return self.delays[0];
        }
        if attempt <= len {
            return self.delays[attempt - 1];
        }
        let extra = u32::try_from(attempt - len).unwrap_or(u32::MAX);
        last.saturating_add(EXTRA_STEP.saturating_mul(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(30));
        assert_eq!(policy.delay_for(4), Duration::from_secs(300));
        assert_eq!(policy.delay_for(5), Duration::from_secs(360));
        assert_eq!(policy.delay_for(6), Duration::from_secs(420));
    }

    #[test]
    fn test_empty_table_uses_default() {
        assert_eq!(RetryPolicy::new(Vec::new()), RetryPolicy::default());
    }

    #[test]
    fn test_custom_table() {
        let policy = RetryPolicy::new(vec![Duration::from_secs(1)]);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(121));
    }

    proptest! {
        #[test]
        fn delay_never_decreases(attempt in 0_u32..10_000) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.delay_for(attempt + 1) >= policy.delay_for(attempt));
        }

        #[test]
        fn delay_beyond_table_grows_by_minutes(extra in 1_u32..1_000) {
            let policy = RetryPolicy::default();
            let attempt = 4 + extra;
            let expected = Duration::from_secs(300 + 60 * u64::from(extra));
            prop_assert_eq!(policy.delay_for(attempt), expected);
        }
    }
}
