//! Outbound delivery channels.
//!
//! [`Mailer`] is the capability the scheduler and dispatchers depend on.
//! The composition root picks [`SmtpMailer`](email::SmtpMailer) when SMTP is
//! configured and [`LogMailer`] otherwise.

use async_trait::async_trait;

use crate::messages::OutboundMessage;

pub mod email;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    /// The channel refused the message for any other reason.
    #[error("Delivery unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

/// Sends one rendered message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// Mailer for deployments without SMTP: logs and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivery not configured, message logged only"
        );
        Ok(())
    }
}
