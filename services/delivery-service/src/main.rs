//! Delivery service entry point.

use courier::{JobQueue, RedisStore, Store, Worker, WorkerOptions};
use delivery_service::{DeliveryServiceConfig, SmtpSender};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting delivery service");

    // Load configuration
    let config = DeliveryServiceConfig::load()?;

    // Connect to Redis
    let store = tokio::time::timeout(
        config.redis.connect_timeout(),
        RedisStore::connect_with_timeout(
            &config.redis.url,
            config.redis.operation_timeout(),
        ),
    )
    .await
    .map_err(|_| anyhow::anyhow!("timed out connecting to {}", config.redis.url))??;
    store.ping().await?;

    info!(
        url = %config.redis.url,
        operation_timeout_ms = store.operation_timeout().as_millis(),
        "Connected to Redis"
    );

    // Build the queue and sender
    let queue = JobQueue::with_prefix(store, &config.queue.prefix);
    let sender = SmtpSender::from_config(&config.smtp)?;
    let options = WorkerOptions::from(&config.worker);

    info!(
        prefix = %config.queue.prefix,
        max_attempts = options.max_attempts,
        recover_in_flight = options.recover_in_flight,
        "Delivery worker starting"
    );

    let handle = Worker::new(queue, sender, options).spawn();

    shutdown_signal().await;

    if !handle.shutdown().await {
        warn!("Delivery worker was aborted before finishing");
    }
    info!("Delivery service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
