//! In-process [`Store`] used by tests and single-node development.
//!
//! Every operation takes one lock, so composite transitions are trivially atomic.
//! TTLs are measured with the tokio clock, which lets tests drive expiry with
//! `tokio::time::pause` and `advance`.

use super::{Store, Transition};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    available: bool,
    strings: HashMap<String, StringEntry>,
    // Head of the list is the front of the deque.
    lists: HashMap<String, VecDeque<String>>,
    sorted: HashMap<String, HashMap<String, i64>>,
}

impl State {
    fn check(&self) -> StoreResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }

    fn live_string(&mut self, key: &str, now: Instant) -> Option<&StringEntry> {
        if self.strings.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.strings.remove(key);
        }
        self.strings.get(key)
    }

    fn push_head(&mut self, list: &str, value: &str) -> usize {
        let entries = self.lists.entry(list.to_string()).or_default();
        entries.push_front(value.to_string());
        entries.len()
    }

    fn pop_tail(&mut self, list: &str) -> Option<String> {
        let entries = self.lists.get_mut(list)?;
        let value = entries.pop_back();
        if entries.is_empty() {
            self.lists.remove(list);
        }
        value
    }

    fn remove_one(&mut self, list: &str, value: &str) -> usize {
        let Some(entries) = self.lists.get_mut(list) else {
            return 0;
        };
        let Some(index) = entries.iter().position(|entry| entry == value) else {
            return 0;
        };
        entries.remove(index);
        if entries.is_empty() {
            self.lists.remove(list);
        }
        1
    }

    fn zadd(&mut self, set: &str, member: &str, score: i64) {
        self.sorted
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }
}

/// Resolve a Redis-style inclusive index against a list of `len` entries.
fn resolve_index(index: isize, len: usize) -> isize {
    let len = isize::try_from(len).unwrap_or(isize::MAX);
    if index < 0 {
        len + index
    } else {
        index
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    pushed: Notify,
}

/// Store backed by process memory.
///
/// Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    available: true,
                    ..State::default()
                }),
                pushed: Notify::new(),
            }),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.inner.state.lock().available = available;
    }

    fn try_pop_push(&self, source: &str, destination: &str) -> StoreResult<Option<String>> {
        let mut state = self.inner.state.lock();
        state.check()?;
        let Some(value) = state.pop_tail(source) else {
            return Ok(None);
        };
        state.push_head(destination, &value);
        drop(state);
        self.inner.pushed.notify_waiters();
        Ok(Some(value))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.inner.state.lock();
        state.check()?;
        Ok(state
            .live_string(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        state.check()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        state.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.inner.state.lock();
        state.check()?;
        let now = Instant::now();
        if state.live_string(key, now).is_some() {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.inner.state.lock();
        state.check()?;
        let now = Instant::now();
        let string = state
            .strings
            .remove(key)
            .is_some_and(|entry| entry.is_live(now));
        let list = state.lists.remove(key).is_some();
        let sorted = state.sorted.remove(key).is_some();
        Ok(string || list || sorted)
    }

    async fn push(&self, list: &str, value: &str) -> StoreResult<usize> {
        let len = {
            let mut state = self.inner.state.lock();
            state.check()?;
            state.push_head(list, value)
        };
        self.inner.pushed.notify_waiters();
        Ok(len)
    }

    async fn pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check and the
            // wait is not missed.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop_push(source, destination)? {
                return Ok(Some(value));
            }
            if timeout.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop_push(source, destination);
            }
        }
    }

    async fn remove(&self, list: &str, value: &str) -> StoreResult<usize> {
        let mut state = self.inner.state.lock();
        state.check()?;
        Ok(state.remove_one(list, value))
    }

    async fn range(&self, list: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let state = self.inner.state.lock();
        state.check()?;
        let Some(entries) = state.lists.get(list) else {
            return Ok(Vec::new());
        };
        let start = resolve_index(start, entries.len()).max(0);
        let stop = resolve_index(stop, entries.len());
        if stop < start {
            return Ok(Vec::new());
        }
        let (Ok(start), Ok(stop)) = (usize::try_from(start), usize::try_from(stop)) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .skip(start)
            .take(stop - start + 1)
            .cloned()
            .collect())
    }

    async fn len(&self, list: &str) -> StoreResult<usize> {
        let state = self.inner.state.lock();
        state.check()?;
        Ok(state.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        state.check()?;
        state.zadd(set, member, score);
        Ok(())
    }

    async fn zrem(&self, set: &str, member: &str) -> StoreResult<usize> {
        let mut state = self.inner.state.lock();
        state.check()?;
        let Some(members) = state.sorted.get_mut(set) else {
            return Ok(0);
        };
        let removed = usize::from(members.remove(member).is_some());
        if members.is_empty() {
            state.sorted.remove(set);
        }
        Ok(removed)
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let state = self.inner.state.lock();
        state.check()?;
        let Some(members) = state.sorted.get(set) else {
            return Ok(Vec::new());
        };
        let mut due: Vec<(i64, &String)> = members
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (*score, member))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn zcard(&self, set: &str) -> StoreResult<usize> {
        let state = self.inner.state.lock();
        state.check()?;
        Ok(state.sorted.get(set).map_or(0, HashMap::len))
    }

    async fn apply(&self, transition: Transition<'_>) -> StoreResult<usize> {
        let (count, pushed) = {
            let mut state = self.inner.state.lock();
            state.check()?;
            match transition {
                Transition::ListToSortedSet {
                    from,
                    remove,
                    to,
                    insert,
                    score,
                } => {
                    let removed = state.remove_one(from, remove);
                    if removed > 0 {
                        state.zadd(to, insert, score);
                    }
                    (removed, false)
                }
                Transition::ListToList {
                    from,
                    remove,
                    to,
                    insert,
                } => {
                    let removed = state.remove_one(from, remove);
                    if removed > 0 {
                        state.push_head(to, insert);
                    }
                    (removed, removed > 0)
                }
                Transition::Drain { from, to } => {
                    let mut moved = 0;
                    while let Some(value) = state.pop_tail(from) {
                        state.push_head(to, &value);
                        moved += 1;
                    }
                    (moved, moved > 0)
                }
            }
        };
        if pushed {
            self.inner.pushed.notify_waiters();
        }
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.state.lock().check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_pop_push_is_fifo() {
        let store = MemoryStore::new();
        store.push("pending", "a").await.unwrap();
        store.push("pending", "b").await.unwrap();

        let first = store
            .pop_push("pending", "processing", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(store.len("pending").await.unwrap(), 1);
        assert_eq!(store.range("processing", 0, -1).await.unwrap(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_push_times_out_on_empty_list() {
        let store = MemoryStore::new();
        let popped = store
            .pop_push("pending", "processing", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pop_push_wakes_on_push() {
        let store = MemoryStore::new();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .pop_push("pending", "processing", Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push("pending", "late").await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_ttl() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("lock", "x", Duration::from_secs(2))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock", "y", Duration::from_secs(2))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.get("lock").await.unwrap().is_none());
        assert!(store
            .set_if_absent("lock", "y", Duration::from_secs(2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_remove_takes_single_occurrence() {
        let store = MemoryStore::new();
        store.push("l", "dup").await.unwrap();
        store.push("l", "dup").await.unwrap();
        assert_eq!(store.remove("l", "dup").await.unwrap(), 1);
        assert_eq!(store.len("l").await.unwrap(), 1);
        assert_eq!(store.remove("l", "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_range_handles_negative_indices() {
        let store = MemoryStore::new();
        for value in ["c", "b", "a"] {
            store.push("l", value).await.unwrap();
        }
        assert_eq!(store.range("l", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.range("l", -2, -1).await.unwrap(), vec!["b", "c"]);
        assert!(store.range("l", 2, 1).await.unwrap().is_empty());
        assert!(store.range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zrange_by_score_orders_and_limits() {
        let store = MemoryStore::new();
        store.zadd("z", "late", 300).await.unwrap();
        store.zadd("z", "early", 100).await.unwrap();
        store.zadd("z", "mid", 200).await.unwrap();

        assert_eq!(
            store.zrange_by_score("z", 250, 10).await.unwrap(),
            vec!["early", "mid"]
        );
        assert_eq!(
            store.zrange_by_score("z", 1_000, 1).await.unwrap(),
            vec!["early"]
        );
        assert_eq!(store.zcard("z").await.unwrap(), 3);
        assert_eq!(store.zrem("z", "mid").await.unwrap(), 1);
        assert_eq!(store.zrem("z", "mid").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transitions_only_insert_when_removed() {
        let store = MemoryStore::new();
        store.push("processing", "old").await.unwrap();

        let moved = store
            .apply(Transition::ListToSortedSet {
                from: "processing",
                remove: "old",
                to: "retry",
                insert: "new",
                score: 10,
            })
            .await
            .unwrap();
        assert_eq!(moved, 1);
        assert_eq!(store.zcard("retry").await.unwrap(), 1);

        let again = store
            .apply(Transition::ListToList {
                from: "processing",
                remove: "old",
                to: "dead",
                insert: "new",
            })
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.len("dead").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_moves_everything_in_order() {
        let store = MemoryStore::new();
        store.push("processing", "first").await.unwrap();
        store.push("processing", "second").await.unwrap();

        let moved = store
            .apply(Transition::Drain {
                from: "processing",
                to: "pending",
            })
            .await
            .unwrap();
        assert_eq!(moved, 2);
        assert_eq!(store.len("processing").await.unwrap(), 0);

        let next = store
            .pop_push("pending", "processing", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.push("l", "v").await.is_err());
        assert!(store.get("k").await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_clears_any_type() {
        let store = MemoryStore::new();
        store.set("s", "v", None).await.unwrap();
        store.push("l", "v").await.unwrap();
        assert!(store.delete("s").await.unwrap());
        assert!(store.delete("l").await.unwrap());
        assert!(!store.delete("s").await.unwrap());
    }
}
