//! Delivery service components.

pub mod outbox;
pub mod smtp;

pub use outbox::{EmailMessage, EmailOutbox, OutboxError, DEFAULT_CONTENT_TYPE};
pub use smtp::SmtpSender;
