//! Reliability primitives over a shared Redis-like store.
//!
//! - [`queue`]: a job queue with at-least-once delivery. Jobs move atomically between
//!   pending, processing, retry and dead structures.
//! - [`worker`]: a delivery loop that reserves jobs, calls a [`Sender`] and enforces a
//!   bounded retry budget with backoff.
//! - [`idempotency`]: claim/resolve/release keys so a duplicated request runs its side
//!   effect once, plus cooldown and dedup marks.
//!
//! All coordination goes through a [`Store`] handle passed in by the caller.
//! [`RedisStore`] is the production adapter; [`MemoryStore`] has the same semantics
//! in-process.
//!
//! ```no_run
//! use courier::{JobQueue, RedisStore};
//! use std::time::Duration;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
//! let queue = JobQueue::new(store);
//! queue.enqueue("hello".to_string()).await?;
//! let job = queue.reserve::<String>(Duration::from_secs(5)).await?;
//! queue.ack(&job).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod idempotency;
pub mod queue;
pub mod store;
pub mod worker;

pub use error::{CourierError, CourierResult, StoreError, StoreResult};
pub use idempotency::{Claim, IdempotencyLock, PENDING_MARKER};
pub use queue::{Job, JobQueue, QueueKeys, QueueStats};
pub use store::{MemoryStore, Store, Transition};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use worker::{
    Delivery, PermanentFailure, RetryPolicy, Sender, Worker, WorkerHandle, WorkerOptions,
};

/// Re-exported so callers can drive [`Worker::run`] without a direct dependency.
pub use tokio_util::sync::CancellationToken;
