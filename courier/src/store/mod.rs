//! Store abstraction shared by the queue and the idempotency lock.
//!
//! The core only relies on the primitives below. Anything that must look atomic to
//! concurrent observers goes through [`Store::apply`] as a single [`Transition`], which
//! adapters execute in one server-side step (a Lua script for Redis, one lock
//! acquisition for the in-memory store).

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisStore, DEFAULT_OPERATION_TIMEOUT};

use crate::error::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Atomic composite operations over lists and sorted sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<'a> {
    /// Remove one `remove` from list `from`; if it was there, add `insert` to the
    /// sorted set `to` with `score`.
    ListToSortedSet {
        /// Source list.
        from: &'a str,
        /// Exact entry to remove.
        remove: &'a str,
        /// Destination sorted set.
        to: &'a str,
        /// Entry to add.
        insert: &'a str,
        /// Score for the inserted entry.
        score: i64,
    },
    /// Remove one `remove` from list `from`; if it was there, push `insert` at the
    /// head of list `to`.
    ListToList {
        /// Source list.
        from: &'a str,
        /// Exact entry to remove.
        remove: &'a str,
        /// Destination list.
        to: &'a str,
        /// Entry to push.
        insert: &'a str,
    },
    /// Move every entry of `from` onto the head of `to`, oldest entry first, leaving
    /// `from` empty.
    Drain {
        /// Source list.
        from: &'a str,
        /// Destination list.
        to: &'a str,
    },
}

impl Transition<'_> {
    /// Short name used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListToSortedSet { .. } => "list_to_sorted_set",
            Self::ListToList { .. } => "list_to_list",
            Self::Drain { .. } => "drain",
        }
    }
}

/// Primitive key-value, list and sorted-set operations.
///
/// Lists are double-ended: [`push`](Store::push) adds at the head and
/// [`pop_push`](Store::pop_push) takes from the tail, so a list used with both behaves
/// as a FIFO.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write a value only if the key is absent. Returns true if this call wrote it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete a key of any type. Returns true if something was deleted.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Push a value at the head of a list. Returns the new length.
    async fn push(&self, list: &str, value: &str) -> StoreResult<usize>;

    /// Atomically pop the tail of `source` and push it at the head of `destination`.
    ///
    /// Waits up to `timeout` for an entry; a zero timeout does not wait. Returns
    /// `None` if nothing arrived in time.
    async fn pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>>;

    /// Remove at most one occurrence of `value`. Returns the number removed.
    async fn remove(&self, list: &str, value: &str) -> StoreResult<usize>;

    /// Read list entries between `start` and `stop` inclusive (negative counts from the tail).
    async fn range(&self, list: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// Length of a list.
    async fn len(&self, list: &str) -> StoreResult<usize>;

    /// Add or re-score a sorted-set member.
    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()>;

    /// Remove a sorted-set member. Returns the number removed.
    async fn zrem(&self, set: &str, member: &str) -> StoreResult<usize>;

    /// Members scored at or below `max_score`, lowest score first, at most `limit`.
    async fn zrange_by_score(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>>;

    /// Cardinality of a sorted set.
    async fn zcard(&self, set: &str) -> StoreResult<usize>;

    /// Execute a composite transition atomically.
    ///
    /// Returns the number of entries removed from the source list (`ListTo*`) or the
    /// number of entries moved (`Drain`).
    async fn apply(&self, transition: Transition<'_>) -> StoreResult<usize>;

    /// Check connectivity.
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        (**self).set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key).await
    }

    async fn push(&self, list: &str, value: &str) -> StoreResult<usize> {
        (**self).push(list, value).await
    }

    async fn pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        (**self).pop_push(source, destination, timeout).await
    }

    async fn remove(&self, list: &str, value: &str) -> StoreResult<usize> {
        (**self).remove(list, value).await
    }

    async fn range(&self, list: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        (**self).range(list, start, stop).await
    }

    async fn len(&self, list: &str) -> StoreResult<usize> {
        (**self).len(list).await
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        (**self).zadd(set, member, score).await
    }

    async fn zrem(&self, set: &str, member: &str) -> StoreResult<usize> {
        (**self).zrem(set, member).await
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        (**self).zrange_by_score(set, max_score, limit).await
    }

    async fn zcard(&self, set: &str) -> StoreResult<usize> {
        (**self).zcard(set).await
    }

    async fn apply(&self, transition: Transition<'_>) -> StoreResult<usize> {
        (**self).apply(transition).await
    }

    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }
}
