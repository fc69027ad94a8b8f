//! Email delivery service built on courier.
//!
//! Request handlers queue mail through [`EmailOutbox`]; the binary runs a
//! [`courier::Worker`] that delivers it with [`SmtpSender`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod services;

pub use config::{DeliveryServiceConfig, QueueConfig, RedisConfig, SmtpConfig, WorkerConfig};
pub use services::{EmailMessage, EmailOutbox, OutboxError, SmtpSender};
