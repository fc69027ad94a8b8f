//! Configuration for the delivery service.

use courier::WorkerOptions;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Deserialize)]
pub struct DeliveryServiceConfig {
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// SMTP configuration.
    pub smtp: SmtpConfig,
    /// Queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Redis configuration.
#[derive(Debug, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Bound on each command reply in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_seconds: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// Connection timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Per-command reply timeout.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// SMTP configuration.
#[derive(Debug, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// SMTP username (optional).
    pub username: Option<String>,
    /// SMTP password (optional).
    pub password: Option<String>,
    /// Use implicit TLS from the first byte.
    #[serde(default)]
    pub tls: bool,
    /// Upgrade a plain connection with STARTTLS. Ignored when `tls` is set.
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    /// Connection and command timeout in seconds.
    #[serde(default = "default_smtp_timeout")]
    pub timeout_seconds: u64,
    /// Sender address.
    pub from_address: Option<String>,
    /// Sender display name.
    pub from_name: Option<String>,
}

/// Queue configuration.
#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    /// Key prefix for the four queue structures.
    #[serde(default = "default_queue_prefix")]
    pub prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: default_queue_prefix(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Reservation timeout in milliseconds.
    #[serde(default = "default_reserve_timeout_ms")]
    pub reserve_timeout_ms: u64,
    /// Retry promotion interval in milliseconds.
    #[serde(default = "default_requeue_interval_ms")]
    pub requeue_interval_ms: u64,
    /// Per-attempt send timeout in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
    /// Attempts before a job is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff table in seconds.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_seconds: Vec<u64>,
    /// Retry entries promoted per tick.
    #[serde(default = "default_requeue_batch_size")]
    pub requeue_batch_size: usize,
    /// Move in-flight jobs back to pending on start.
    #[serde(default = "default_recover_in_flight")]
    pub recover_in_flight: bool,
    /// Shutdown grace period in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reserve_timeout_ms: default_reserve_timeout_ms(),
            requeue_interval_ms: default_requeue_interval_ms(),
            send_timeout_seconds: default_send_timeout(),
            max_attempts: default_max_attempts(),
            retry_delays_seconds: default_retry_delays(),
            requeue_batch_size: default_requeue_batch_size(),
            recover_in_flight: default_recover_in_flight(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self::default()
            .with_reserve_timeout(Duration::from_millis(config.reserve_timeout_ms))
            .with_requeue_interval(Duration::from_millis(config.requeue_interval_ms))
            .with_send_timeout(Duration::from_secs(config.send_timeout_seconds))
            .with_max_attempts(config.max_attempts)
            .with_retry_delays(
                config
                    .retry_delays_seconds
                    .iter()
                    .copied()
                    .map(Duration::from_secs)
                    .collect(),
            )
            .with_requeue_batch_size(config.requeue_batch_size)
            .with_recover_in_flight(config.recover_in_flight)
            .with_shutdown_grace(Duration::from_secs(config.shutdown_grace_seconds))
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

const fn default_connect_timeout() -> u64 {
    5
}

const fn default_operation_timeout_ms() -> u64 {
    3_000
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_starttls() -> bool {
    true
}

const fn default_smtp_timeout() -> u64 {
    10
}

fn default_queue_prefix() -> String {
    courier::queue::DEFAULT_PREFIX.to_string()
}

const fn default_reserve_timeout_ms() -> u64 {
    5_000
}

const fn default_requeue_interval_ms() -> u64 {
    5_000
}

const fn default_send_timeout() -> u64 {
    15
}

const fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delays() -> Vec<u64> {
    vec![10, 30, 60, 300]
}

const fn default_requeue_batch_size() -> usize {
    50
}

const fn default_recover_in_flight() -> bool {
    true
}

const fn default_shutdown_grace() -> u64 {
    10
}

impl DeliveryServiceConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("DELIVERY_SERVICE_").split("__"));

        Self::from_figment(&figment)
    }

    /// Extract configuration from an assembled figment.
    ///
    /// # Errors
    ///
    /// Returns error if a required field is missing or a value has the wrong type.
    pub fn from_figment(figment: &Figment) -> anyhow::Result<Self> {
        let config: Self = figment.extract()?;
        Ok(config)
    }
}
