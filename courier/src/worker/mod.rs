//! Delivery worker: drains a [`JobQueue`], calls a [`Sender`] and enforces the retry
//! budget.
//!
//! Two loops run per worker and share nothing but the Store:
//!
//! 1. the main loop reserves one job at a time, sends it with a bounded timeout, then
//!    acks, schedules a retry or dead-letters it;
//! 2. the promoter moves due retry entries back to pending on a fixed interval, a
//!    bounded batch per tick.
//!
//! Both observe a [`CancellationToken`] and exit within one iteration. Store failures
//! inside either loop are logged and the loop carries on.

mod backoff;
mod sender;

pub use backoff::{RetryPolicy, DEFAULT_RETRY_DELAYS};
pub use sender::{PermanentFailure, Sender};

use crate::error::{CourierError, CourierResult};
use crate::queue::{Job, JobQueue};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_RESERVE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_REQUEUE_BATCH_SIZE: usize = 50;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Pause after a failed reservation before the next one.
const STORE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Reason recorded for entries that could not be decoded.
pub const INVALID_PAYLOAD_REASON: &str = "invalid payload";

/// Worker tuning. Zero values are replaced by the defaults when the worker is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// How long one reservation waits for pending work. Bounds cancellation latency.
    pub reserve_timeout: Duration,
    /// How often due retries are promoted.
    pub requeue_interval: Duration,
    /// Bound on a single send attempt.
    pub send_timeout: Duration,
    /// Attempt ceiling for jobs without their own.
    pub max_attempts: u32,
    /// Backoff table.
    pub retry_policy: RetryPolicy,
    /// Maximum retry entries promoted per tick.
    pub requeue_batch_size: usize,
    /// Move processing entries back to pending on start.
    pub recover_in_flight: bool,
    /// How long [`WorkerHandle::shutdown`] waits before aborting the tasks.
    pub shutdown_grace: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            reserve_timeout: DEFAULT_RESERVE_TIMEOUT,
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_policy: RetryPolicy::default(),
            requeue_batch_size: DEFAULT_REQUEUE_BATCH_SIZE,
            recover_in_flight: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl WorkerOptions {
    /// Set the reservation timeout.
    #[must_use]
    pub const fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    /// Set the promotion interval.
    #[must_use]
    pub const fn with_requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }

    /// Set the per-attempt send timeout.
    #[must_use]
    pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the default attempt ceiling.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff table.
    #[must_use]
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_policy = RetryPolicy::new(delays);
        self
    }

    /// Set the promotion batch size.
    #[must_use]
    pub const fn with_requeue_batch_size(mut self, size: usize) -> Self {
        self.requeue_batch_size = size;
        self
    }

    /// Enable or disable startup recovery.
    #[must_use]
    pub const fn with_recover_in_flight(mut self, recover: bool) -> Self {
        self.recover_in_flight = recover;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    fn normalized(mut self) -> Self {
        fn or_default(value: Duration, default: Duration) -> Duration {
            if value.is_zero() {
                default
            } else {
                value
            }
        }
        self.reserve_timeout = or_default(self.reserve_timeout, DEFAULT_RESERVE_TIMEOUT);
        self.requeue_interval = or_default(self.requeue_interval, DEFAULT_REQUEUE_INTERVAL);
        self.send_timeout = or_default(self.send_timeout, DEFAULT_SEND_TIMEOUT);
        self.shutdown_grace = or_default(self.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.requeue_batch_size == 0 {
            self.requeue_batch_size = DEFAULT_REQUEUE_BATCH_SIZE;
        }
        self
    }
}

/// What happened to a reserved job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent and removed from processing.
    Acked,
    /// Send failed; the job is in the retry set, due after `delay`.
    Retrying {
        /// Backoff applied.
        delay: Duration,
    },
    /// The retry budget is spent or the failure was permanent; the job is in the dead list.
    DeadLettered,
    /// The job was no longer in processing, so nothing was moved.
    Stale,
}

/// Drains one queue through one sender.
#[derive(Debug)]
pub struct Worker<S, T> {
    queue: JobQueue<S>,
    sender: T,
    options: WorkerOptions,
}

impl<S, T> Worker<S, T>
where
    S: Store + 'static,
    T: Sender,
    T::Payload: Serialize + DeserializeOwned,
{
    /// Build a worker. Zero-valued options fall back to their defaults.
    #[must_use]
    pub fn new(queue: JobQueue<S>, sender: T, options: WorkerOptions) -> Self {
        Self {
            queue,
            sender,
            options: options.normalized(),
        }
    }

    /// Effective options.
    #[must_use]
    pub const fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// The queue being drained.
    #[must_use]
    pub const fn queue(&self) -> &JobQueue<S> {
        &self.queue
    }

    /// Run both loops on the current task until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.recover().await;
        tokio::join!(self.process(&cancel), self.promote(&cancel));
        info!("worker stopped");
    }

    /// Run both loops on their own tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let grace = self.options.shutdown_grace;
        let worker = Arc::new(self);

        let main = {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                worker.recover().await;
                worker.process(&cancel).await;
            })
        };
        let promoter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.promote(&cancel).await })
        };

        WorkerHandle {
            cancel,
            tasks: vec![main, promoter],
            grace,
        }
    }

    async fn recover(&self) {
        if !self.options.recover_in_flight {
            return;
        }
        match self.queue.recover_in_flight().await {
            Ok(count) => info!(count, "worker recovered in-flight jobs"),
            Err(e) => warn!(error = %e, "worker recover in-flight failed"),
        }
    }

    async fn process(&self, cancel: &CancellationToken) {
        info!(
            reserve_timeout_ms = self.options.reserve_timeout.as_millis(),
            send_timeout_ms = self.options.send_timeout.as_millis(),
            max_attempts = self.options.max_attempts,
            "worker started"
        );
        while !cancel.is_cancelled() {
            let reserved = tokio::select! {
                () = cancel.cancelled() => break,
                reserved = self.queue.reserve::<T::Payload>(self.options.reserve_timeout) => reserved,
            };

            match reserved {
                Ok(job) => {
                    if let Err(e) = self.handle_job(job).await {
                        warn!(error = %e, "worker failed to settle job");
                    }
                }
                Err(CourierError::QueueEmpty) => {}
                Err(CourierError::InvalidPayload { raw, reason }) => {
                    warn!(%reason, "worker reserved undecodable entry");
                    if let Err(e) = self
                        .queue
                        .dead_letter_raw(&raw, INVALID_PAYLOAD_REASON)
                        .await
                    {
                        warn!(error = %e, "worker dead-letter failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "worker reserve failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(STORE_ERROR_PAUSE) => {}
                    }
                }
            }
        }
    }

    async fn promote(&self, cancel: &CancellationToken) {
        let period = self.options.requeue_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("promoter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.requeue_due(self.options.requeue_batch_size).await {
                        warn!(error = %e, "worker requeue failed");
                    }
                }
            }
        }
    }

    /// Send one reserved job and settle it.
    ///
    /// # Errors
    ///
    /// Returns the Store error if the ack, retry or dead-letter call fails. The job then
    /// stays in processing until recovered.
    pub async fn handle_job(&self, mut job: Job<T::Payload>) -> CourierResult<Delivery> {
        let timeout = self.options.send_timeout;
        let (error, permanent) =
            match tokio::time::timeout(timeout, self.sender.send(&job.payload)).await {
                Ok(Ok(())) => {
                    let removed = self.queue.ack(&job).await?;
                    debug!(job_id = %job.id, "job delivered");
                    return Ok(settled(removed, Delivery::Acked));
                }
                Ok(Err(e)) => (
                    e.to_string(),
                    e.downcast_ref::<PermanentFailure>().is_some(),
                ),
                Err(_) => (
                    format!("send timed out after {}ms", timeout.as_millis()),
                    false,
                ),
            };

        job.record_failure(error.clone());
        let max_attempts = job.effective_max_attempts(self.options.max_attempts);

        if permanent || job.attempts >= max_attempts {
            let removed = self.queue.dead_letter(&mut job, &error).await?;
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                permanent,
                error = %error,
                "job will not be retried"
            );
            return Ok(settled(removed, Delivery::DeadLettered));
        }

        let delay = self.options.retry_policy.delay_for(job.attempts);
        let removed = self.queue.retry(&job, delay).await?;
        warn!(
            job_id = %job.id,
            attempts = job.attempts,
            delay_ms = delay.as_millis(),
            error = %error,
            "job retry scheduled"
        );
        Ok(settled(removed, Delivery::Retrying { delay }))
    }
}

const fn settled(removed: usize, outcome: Delivery) -> Delivery {
    if removed == 0 {
        Delivery::Stale
    } else {
        outcome
    }
}

/// Handle to a worker started with [`Worker::spawn`].
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl WorkerHandle {
    /// Token that stops the worker when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel both loops and wait for them, aborting whatever is still running after
    /// the grace period. Returns true if everything stopped within the grace period.
    pub async fn shutdown(self) -> bool {
        self.cancel.cancel();
        let mut tasks = self.tasks;

        let joined = tokio::time::timeout(self.grace, async {
            for task in &mut tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "worker task ended abnormally");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace_ms = self.grace.as_millis(),
                "worker did not stop within grace period, aborting"
            );
            for task in &tasks {
                task.abort();
            }
            return false;
        }
        info!("worker shut down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = WorkerOptions::default();
        assert_eq!(options.reserve_timeout, Duration::from_secs(5));
        assert_eq!(options.requeue_interval, Duration::from_secs(5));
        assert_eq!(options.send_timeout, Duration::from_secs(15));
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.requeue_batch_size, 50);
        assert!(!options.recover_in_flight);
        assert_eq!(options.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_options_fall_back() {
        let options = WorkerOptions::default()
            .with_reserve_timeout(Duration::ZERO)
            .with_send_timeout(Duration::ZERO)
            .with_max_attempts(0)
            .with_requeue_batch_size(0)
            .normalized();
        assert_eq!(options, WorkerOptions::default());
    }

    #[test]
    fn test_builder_sets_fields() {
        let options = WorkerOptions::default()
            .with_max_attempts(3)
            .with_retry_delays(vec![Duration::from_secs(1)])
            .with_recover_in_flight(true)
            .normalized();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.retry_policy.delays(), &[Duration::from_secs(1)]);
        assert!(options.recover_in_flight);
    }

    #[test]
    fn test_stale_settlement() {
        assert_eq!(settled(0, Delivery::Acked), Delivery::Stale);
        assert_eq!(settled(1, Delivery::DeadLettered), Delivery::DeadLettered);
    }
}
