//! Applicant notifications.
//!
//! Handlers talk to a [`Mailer`] so the SMTP transport can be swapped for a
//! recording double in tests.

pub mod email;

pub use email::{render_allocation_email, render_registration_email, SmtpMailer};

use anyhow::Result;
use async_trait::async_trait;

/// A rendered email ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No transport configured; the message was logged and dropped
    Skipped,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<Delivery>;

    /// Whether a real transport is configured
    fn is_enabled(&self) -> bool;

    /// Open a connection to the relay without sending anything
    async fn test_connection(&self) -> Result<()>;
}
