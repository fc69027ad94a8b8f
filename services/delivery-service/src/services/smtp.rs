//! SMTP delivery for queued email.

use super::outbox::{EmailMessage, DEFAULT_CONTENT_TYPE};
use crate::config::SmtpConfig;
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use courier::{PermanentFailure, Sender};
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, error, info};

/// Sends [`EmailMessage`] payloads through an SMTP relay.
pub struct SmtpSender {
    /// SMTP transport.
    transport: AsyncSmtpTransport<Tokio1Executor>,
    /// Sender mailbox.
    from: Mailbox,
}

impl std::fmt::Debug for SmtpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSender")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpSender {
    /// Build a sender from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the from address is missing or invalid, or the relay cannot
    /// be configured.
    pub fn from_config(config: &SmtpConfig) -> anyhow::Result<Self> {
        let Some(address) = config.from_address.as_deref() else {
            bail!("smtp.from_address is required");
        };
        let from = Mailbox::new(config.from_name.clone(), address.trim().parse()?);

        let mut transport_builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        transport_builder = transport_builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            let credentials = Credentials::new(user.clone(), pass.clone());
            transport_builder = transport_builder.credentials(credentials);
        }

        info!(
            host = %config.host,
            port = config.port,
            tls = config.tls,
            starttls = config.starttls,
            "Created SMTP transport"
        );

        Ok(Self {
            transport: transport_builder.build(),
            from,
        })
    }

    /// Sender mailbox.
    #[must_use]
    pub const fn mailbox(&self) -> &Mailbox {
        &self.from
    }
}

/// Build the wire message for `email` from `from`.
///
/// # Errors
///
/// Returns error if a recipient, the content type or a header name cannot be parsed.
pub fn build_message(from: &Mailbox, email: &EmailMessage) -> anyhow::Result<Message> {
    if email.to.is_empty() {
        bail!("recipient is empty");
    }
    let content_type = match email.content_type.trim() {
        "" => DEFAULT_CONTENT_TYPE,
        value => value,
    };
    let content_type = ContentType::parse(content_type)
        .map_err(|e| anyhow!("invalid content type {content_type:?}: {e}"))?;

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(&email.subject)
        .header(content_type);
    for to in &email.to {
        let mailbox: Mailbox = to
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid recipient {to:?}: {e}"))?;
        builder = builder.to(mailbox);
    }
    for (name, value) in &email.headers {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let name = HeaderName::new_from_ascii(name.to_string())
            .map_err(|e| anyhow!("invalid header name {name:?}: {e}"))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    builder.body(email.body.clone()).map_err(|e| {
        error!(error = %e, "Failed to build email message");
        anyhow!("failed to build message: {e}")
    })
}

#[async_trait]
impl Sender for SmtpSender {
    type Payload = EmailMessage;

    async fn send(&self, payload: &EmailMessage) -> anyhow::Result<()> {
        // A message that cannot be built now never will be.
        let message = build_message(&self.from, payload).map_err(PermanentFailure::new)?;
        let response = self.transport.send(message).await?;
        if !response.is_positive() {
            bail!("smtp server rejected message: {}", response.code());
        }
        debug!(recipients = payload.to.len(), "Email sent successfully");
        Ok(())
    }
}
