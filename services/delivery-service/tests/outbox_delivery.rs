//! Integration tests for the outbox-to-worker path
//!
//! Messages accepted by the outbox are delivered by a worker; a failing relay ends
//! with the message in the dead list carrying the relay error.

use async_trait::async_trait;
use courier::{JobQueue, MemoryStore, Sender, Worker, WorkerOptions};
use delivery_service::{EmailMessage, EmailOutbox};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Records messages, or rejects everything when `reject` is set.
#[derive(Default)]
struct FakeRelay {
    reject: bool,
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Sender for FakeRelay {
    type Payload = EmailMessage;

    async fn send(&self, payload: &EmailMessage) -> anyhow::Result<()> {
        if self.reject {
            anyhow::bail!("550 mailbox unavailable");
        }
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

fn options() -> WorkerOptions {
    WorkerOptions::default()
        .with_reserve_timeout(Duration::from_millis(50))
        .with_requeue_interval(Duration::from_millis(50))
}

/// Queued mail reaches the relay with its defaults filled in
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_outbox_message_is_delivered() {
    let queue = JobQueue::new(MemoryStore::new());
    let outbox = EmailOutbox::new(queue.clone());
    let relay = Arc::new(FakeRelay::default());
    let handle = Worker::new(queue.clone(), Arc::clone(&relay), options()).spawn();

    outbox
        .enqueue(EmailMessage::text("user@example.com", "Welcome", "Hello there"))
        .await
        .expect("Should enqueue");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while relay.sent.lock().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "Message was not delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.shutdown().await);

    let sent = relay.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, ["user@example.com"]);
    assert_eq!(sent[0].content_type, "text/plain; charset=utf-8");
}

/// A permanently failing relay dead-letters after the attempt ceiling
#[tokio::test]
async fn test_rejected_message_is_dead_lettered() {
    let queue = JobQueue::new(MemoryStore::new());
    let outbox = EmailOutbox::new(queue.clone());
    let relay = FakeRelay {
        reject: true,
        ..FakeRelay::default()
    };
    let worker = Worker::new(queue.clone(), relay, options().with_max_attempts(1));

    outbox
        .enqueue(EmailMessage::text("user@example.com", "Reset", "Token"))
        .await
        .expect("Should enqueue");
    let job = queue
        .reserve::<EmailMessage>(Duration::ZERO)
        .await
        .expect("Should reserve");
    worker.handle_job(job).await.expect("Should settle");

    let stats = queue.stats().await.expect("Should read stats");
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.processing, 0);
}
