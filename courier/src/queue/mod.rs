//! Durable job queue with at-least-once delivery.
//!
//! A queue is four Store structures sharing a prefix:
//!
//! | key           | type       | holds                                   |
//! |---------------|------------|-----------------------------------------|
//! | `:pending`    | list       | jobs waiting to be reserved (FIFO)      |
//! | `:processing` | list       | reserved, unacknowledged jobs           |
//! | `:retry`      | sorted set | failed jobs, scored by due Unix seconds |
//! | `:dead`       | list       | exhausted or corrupt jobs, newest first |
//!
//! Every move between structures is one atomic Store step, so after any single
//! operation a job sits in exactly one of them.

mod job;
mod keys;

pub use job::Job;
pub use keys::{QueueKeys, DEFAULT_PREFIX};

use crate::error::{CourierError, CourierResult};
use crate::store::{Store, Transition};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Entry counts per queue structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs waiting to be reserved.
    pub pending: usize,
    /// Jobs reserved and not yet acknowledged.
    pub processing: usize,
    /// Jobs waiting for their retry time.
    pub delayed: usize,
    /// Dead-lettered jobs.
    pub dead: usize,
}

/// Job queue over a [`Store`].
#[derive(Debug, Clone)]
pub struct JobQueue<S> {
    store: S,
    keys: QueueKeys,
}

impl<S: Store> JobQueue<S> {
    /// Queue under the default `email:queue` prefix.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_keys(store, QueueKeys::default())
    }

    /// Queue under `prefix`.
    #[must_use]
    pub fn with_prefix(store: S, prefix: &str) -> Self {
        Self::with_keys(store, QueueKeys::new(prefix))
    }

    /// Queue over an explicit key layout.
    #[must_use]
    pub const fn with_keys(store: S, keys: QueueKeys) -> Self {
        Self { store, keys }
    }

    /// Key layout in use.
    #[must_use]
    pub const fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Underlying store handle.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Wrap `payload` in a new job and append it to pending.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] if the push fails and
    /// [`CourierError::Encode`] if the payload cannot be serialised.
    pub async fn enqueue<P: Serialize + Send + Sync>(&self, payload: P) -> CourierResult<Job<P>> {
        let job = Job::new(payload);
        self.enqueue_job(&job).await?;
        Ok(job)
    }

    /// Append an existing job to pending.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] if the push fails and
    /// [`CourierError::Encode`] if the job cannot be serialised.
    pub async fn enqueue_job<P: Serialize + Sync>(&self, job: &Job<P>) -> CourierResult<()> {
        let entry = serde_json::to_string(job)?;
        self.store.push(&self.keys.pending, &entry).await?;
        debug!(job_id = %job.id, "job enqueued");
        Ok(())
    }

    /// Move the oldest pending job to processing, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::QueueEmpty`] when nothing arrives in time, and
    /// [`CourierError::InvalidPayload`] when the entry cannot be decoded. The corrupt
    /// entry is then in processing and must be passed to
    /// [`dead_letter_raw`](Self::dead_letter_raw).
    pub async fn reserve<P: DeserializeOwned>(&self, timeout: Duration) -> CourierResult<Job<P>> {
        let Some(raw) = self
            .store
            .pop_push(&self.keys.pending, &self.keys.processing, timeout)
            .await?
        else {
            return Err(CourierError::QueueEmpty);
        };

        match serde_json::from_str::<Job<P>>(&raw) {
            Ok(mut job) => {
                debug!(job_id = %job.id, attempts = job.attempts, "job reserved");
                job.set_raw(raw);
                Ok(job)
            }
            Err(e) => Err(CourierError::InvalidPayload {
                raw,
                reason: e.to_string(),
            }),
        }
    }

    /// Remove a reserved job from processing. Returns the number of entries removed;
    /// zero means the job was no longer in flight.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::NotReserved`] for a job that did not come from
    /// [`reserve`](Self::reserve) and [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn ack<P>(&self, job: &Job<P>) -> CourierResult<usize> {
        let raw = reserved_raw(job)?;
        let removed = self.store.remove(&self.keys.processing, raw).await?;
        if removed == 0 {
            warn!(job_id = %job.id, "ack matched no in-flight entry");
        }
        Ok(removed)
    }

    /// Atomically move a reserved job from processing to the retry set, due after
    /// `delay`. The job's current fields are re-serialised into the new entry.
    ///
    /// Returns the number of in-flight entries removed. On zero nothing is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::NotReserved`], [`CourierError::Encode`] or
    /// [`CourierError::StoreUnavailable`].
    pub async fn retry<P: Serialize + Sync>(
        &self,
        job: &Job<P>,
        delay: Duration,
    ) -> CourierResult<usize> {
        let raw = reserved_raw(job)?;
        let entry = serde_json::to_string(job)?;
        let due = due_score(delay);
        let removed = self
            .store
            .apply(Transition::ListToSortedSet {
                from: &self.keys.processing,
                remove: raw,
                to: &self.keys.retry,
                insert: &entry,
                score: due,
            })
            .await?;
        debug!(job_id = %job.id, due, removed, "job scheduled for retry");
        Ok(removed)
    }

    /// Atomically move a reserved job from processing to dead, recording `reason` as
    /// its last error.
    ///
    /// Returns the number of in-flight entries removed. On zero nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::NotReserved`], [`CourierError::Encode`] or
    /// [`CourierError::StoreUnavailable`].
    pub async fn dead_letter<P: Serialize + Send + Sync>(
        &self,
        job: &mut Job<P>,
        reason: &str,
    ) -> CourierResult<usize> {
        let raw = reserved_raw(job)?.to_string();
        job.last_error = Some(reason.to_string());
        job.updated_at = Utc::now();
        let entry = serde_json::to_string(job)?;
        let removed = self
            .store
            .apply(Transition::ListToList {
                from: &self.keys.processing,
                remove: &raw,
                to: &self.keys.dead,
                insert: &entry,
            })
            .await?;
        warn!(job_id = %job.id, attempts = job.attempts, reason, removed, "job dead-lettered");
        Ok(removed)
    }

    /// Atomically move an undecodable entry from processing to dead, unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn dead_letter_raw(&self, raw: &str, reason: &str) -> CourierResult<usize> {
        let removed = self
            .store
            .apply(Transition::ListToList {
                from: &self.keys.processing,
                remove: raw,
                to: &self.keys.dead,
                insert: raw,
            })
            .await?;
        warn!(reason, removed, "corrupt entry dead-lettered");
        Ok(removed)
    }

    /// Move up to `limit` retry entries that are due back to pending. Returns the
    /// number moved.
    ///
    /// An entry is pushed only by the caller whose removal succeeded, so competing
    /// promoters never duplicate it.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure; entries moved
    /// before the failure stay moved.
    pub async fn requeue_due(&self, limit: usize) -> CourierResult<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let now = Utc::now().timestamp();
        let due = self
            .store
            .zrange_by_score(&self.keys.retry, now, limit)
            .await?;

        let mut moved = 0;
        for entry in due {
            if self.store.zrem(&self.keys.retry, &entry).await? == 0 {
                continue;
            }
            self.store.push(&self.keys.pending, &entry).await?;
            moved += 1;
        }
        if moved > 0 {
            debug!(count = moved, "due jobs requeued");
        }
        Ok(moved)
    }

    /// Move every in-flight entry back to pending, oldest first. Returns the number
    /// recovered.
    ///
    /// Assumes no other worker is processing this queue at the time of the call.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn recover_in_flight(&self) -> CourierResult<usize> {
        let recovered = self
            .store
            .apply(Transition::Drain {
                from: &self.keys.processing,
                to: &self.keys.pending,
            })
            .await?;
        if recovered > 0 {
            info!(count = recovered, "recovered in-flight jobs");
        }
        Ok(recovered)
    }

    /// Current entry counts.
    ///
    /// The four reads are independent, so the counts may be mutually inconsistent
    /// under concurrent activity.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::StoreUnavailable`] on Store failure.
    pub async fn stats(&self) -> CourierResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.len(&self.keys.pending).await?,
            processing: self.store.len(&self.keys.processing).await?,
            delayed: self.store.zcard(&self.keys.retry).await?,
            dead: self.store.len(&self.keys.dead).await?,
        })
    }
}

/// Retry score for a job failing now: the first whole Unix second at or after
/// `now + delay`. A zero delay is due in the current second.
fn due_score(delay: Duration) -> i64 {
    let now = Utc::now();
    if delay.is_zero() {
        return now.timestamp();
    }
    let delay_millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    let due_millis = now.timestamp_millis().saturating_add(delay_millis);
    due_millis.saturating_add(999) / 1000
}

fn reserved_raw<P>(job: &Job<P>) -> CourierResult<&str> {
    job.raw()
        .ok_or_else(|| CourierError::NotReserved(job.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> JobQueue<MemoryStore> {
        JobQueue::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_reserve_sets_removal_token() {
        let queue = queue();
        let queued = queue.enqueue("hello".to_string()).await.unwrap();

        let job: Job<String> = queue.reserve(Duration::ZERO).await.unwrap();
        assert_eq!(job.id, queued.id);
        assert!(job.raw().is_some());
        assert_eq!(queue.ack(&job).await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_operations_require_reservation() {
        let queue = queue();
        let mut job = Job::new(1_u32);
        assert!(matches!(
            queue.ack(&job).await,
            Err(CourierError::NotReserved(_))
        ));
        assert!(matches!(
            queue.retry(&job, Duration::from_secs(1)).await,
            Err(CourierError::NotReserved(_))
        ));
        assert!(matches!(
            queue.dead_letter(&mut job, "x").await,
            Err(CourierError::NotReserved(_))
        ));
    }

    #[tokio::test]
    async fn test_reserve_empty_queue() {
        let queue = queue();
        let result = queue.reserve::<String>(Duration::ZERO).await;
        assert!(matches!(result, Err(CourierError::QueueEmpty)));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_dead_lettered_verbatim() {
        let queue = queue();
        queue
            .store()
            .push(&queue.keys().pending, "not json")
            .await
            .unwrap();

        let Err(CourierError::InvalidPayload { raw, .. }) =
            queue.reserve::<String>(Duration::ZERO).await
        else {
            panic!("expected invalid payload");
        };
        assert_eq!(queue.dead_letter_raw(&raw, "invalid payload").await.unwrap(), 1);

        let dead = queue.store().range(&queue.keys().dead, 0, -1).await.unwrap();
        assert_eq!(dead, vec!["not json"]);
        assert_eq!(queue.stats().await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_requeue_zero_limit_is_noop() {
        let queue = queue();
        assert_eq!(queue.requeue_due(0).await.unwrap(), 0);
    }

    #[test]
    fn test_due_score_never_early() {
        for delay in [
            Duration::from_millis(1),
            Duration::from_millis(1_500),
            Duration::from_secs(10),
        ] {
            let before = Utc::now().timestamp_millis();
            let due = due_score(delay);
            let after = Utc::now().timestamp_millis();
            let delay = i64::try_from(delay.as_millis()).unwrap();
            assert!(due * 1000 >= before + delay, "due {due} is early for {delay}ms");
            assert!(due * 1000 < after + delay + 1000, "due {due} is late for {delay}ms");
        }
    }

    #[test]
    fn test_zero_delay_is_due_now() {
        let before = Utc::now().timestamp();
        let due = due_score(Duration::ZERO);
        assert!(due >= before && due <= Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let queue = queue();
        queue.store().set_available(false);
        let result = queue.enqueue("x").await;
        assert!(matches!(result, Err(CourierError::StoreUnavailable(_))));
    }
}
