//! Idempotency lock: one executor per logical operation.
//!
//! A claim key moves through three states:
//!
//! ```text
//! absent --claim--> pending --resolve--> resolved
//!                      |
//!                      +--release / TTL expiry--> absent
//! ```
//!
//! Only the caller whose conditional set created the pending marker runs the side
//! effect. Others see [`CourierError::InProgress`] while it is pending, or the stored
//! result once it is resolved.

pub mod keys;

use crate::error::{CourierError, CourierResult};
use crate::store::Store;
use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use tracing::debug;

/// Value held by a key whose operation is still running.
pub const PENDING_MARKER: &str = "__pending__";

const COOLDOWN_MARKER: &str = "1";

/// Attempts to win a key that disappears between the failed set and the read.
const CLAIM_ROUNDS: usize = 3;

/// Outcome of [`IdempotencyLock::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the operation and must resolve or release it.
    Won,
    /// The operation already completed; replay this stored result.
    Resolved(String),
}

/// Claim-or-observe lock over a [`Store`].
#[derive(Debug, Clone)]
pub struct IdempotencyLock<S> {
    store: S,
    namespace: String,
}

impl<S: Store> IdempotencyLock<S> {
    /// Lock whose keys are used as given.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            namespace: String::new(),
        }
    }

    /// Lock whose keys are prefixed with `namespace:`.
    #[must_use]
    pub fn with_namespace(store: S, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.trim().to_string(),
        }
    }

    fn key(&self, key: &str) -> CourierResult<String> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CourierError::InvalidArgument("idempotency key is empty"));
        }
        if self.namespace.is_empty() {
            Ok(key.to_string())
        } else {
            Ok(format!("{}:{key}", self.namespace))
        }
    }

    /// Try to become the single executor for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::InProgress`] while another caller holds the pending
    /// marker, [`CourierError::InvalidArgument`] for a blank key and
    /// [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn claim(&self, key: &str, pending_ttl: Duration) -> CourierResult<Claim> {
        let key = self.key(key)?;
        for _ in 0..CLAIM_ROUNDS {
            if self
                .store
                .set_if_absent(&key, PENDING_MARKER, pending_ttl)
                .await?
            {
                debug!(key = %key, "idempotency claim won");
                return Ok(Claim::Won);
            }
            match self.store.get(&key).await? {
                Some(value) if value == PENDING_MARKER => {
                    debug!(key = %key, "idempotency claim in progress");
                    return Err(CourierError::InProgress(key));
                }
                Some(value) => {
                    debug!(key = %key, "idempotency claim replayed");
                    return Ok(Claim::Resolved(value));
                }
                // Released or expired since the set; try again.
                None => {}
            }
        }
        Err(CourierError::InProgress(key))
    }

    /// Record the result of a won claim, replacing the pending marker.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::InvalidArgument`] if `value` is empty or equals
    /// [`PENDING_MARKER`], and [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn resolve(&self, key: &str, value: &str, resolved_ttl: Duration) -> CourierResult<()> {
        let key = self.key(key)?;
        if value.is_empty() {
            return Err(CourierError::InvalidArgument("resolved value is empty"));
        }
        if value == PENDING_MARKER {
            return Err(CourierError::InvalidArgument(
                "resolved value equals the pending marker",
            ));
        }
        self.store.set(&key, value, Some(resolved_ttl)).await?;
        debug!(key = %key, "idempotency claim resolved");
        Ok(())
    }

    /// Drop a claim so a retry can win it. Returns true if the key existed.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn release(&self, key: &str) -> CourierResult<bool> {
        let key = self.key(key)?;
        let released = self.store.delete(&key).await?;
        debug!(key = %key, released, "idempotency claim released");
        Ok(released)
    }

    /// Allow an action for `subject` at most once per `window`. Returns true if the
    /// action may proceed, false while the cooldown from an earlier call is running.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn cooldown(&self, subject: &str, window: Duration) -> CourierResult<bool> {
        let key = self.key(subject)?;
        let allowed = self
            .store
            .set_if_absent(&key, COOLDOWN_MARKER, window)
            .await?;
        debug!(key = %key, allowed, "cooldown checked");
        Ok(allowed)
    }

    /// Record the first sighting of `key`, stamped with the current time. Returns
    /// true the first time and false for duplicates seen within `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn mark_once(&self, key: &str, ttl: Duration) -> CourierResult<bool> {
        let key = self.key(key)?;
        let seen_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let first = self.store.set_if_absent(&key, &seen_at, ttl).await?;
        debug!(key = %key, first, "dedup mark checked");
        Ok(first)
    }
}
