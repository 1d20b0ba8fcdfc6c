//! SMTP delivery and templates for applicant emails.

use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;

use super::{Delivery, Mailer, OutgoingEmail};
use crate::config::EmailConfig;
use crate::db::Registration;

/// Sends mail through the configured SMTP relay
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_transport(&self, smtp_host: &str) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port)
        .timeout(Some(Duration::from_secs(self.config.timeout_secs)));

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        Ok(mailer.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<Delivery> {
        let (Some(smtp_host), Some(from_address)) =
            (&self.config.smtp_host, &self.config.from_address)
        else {
            tracing::warn!(
                to = %email.to,
                subject = %email.subject,
                "Email not configured, skipping"
            );
            return Ok(Delivery::Skipped);
        };

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = email.to.parse()?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )?;

        self.build_transport(smtp_host)?.send(message).await?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent successfully");
        Ok(Delivery::Sent)
    }

    fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    async fn test_connection(&self) -> Result<()> {
        let Some(smtp_host) = &self.config.smtp_host else {
            anyhow::bail!("SMTP host is not configured");
        };
        if !self.build_transport(smtp_host)?.test_connection().await? {
            anyhow::bail!("SMTP server {} did not accept the connection", smtp_host);
        }
        Ok(())
    }
}

/// Confirmation sent after a registration is submitted
pub fn render_registration_email(registration: &Registration, delegate_id: &str) -> OutgoingEmail {
    let name = &registration.first_name;
    let first_choice = format!(
        "{} ({})",
        registration.committee_preference_1, registration.portfolio_preference_1
    );

    let text_body = format!(
        "Dear {name},\n\n\
         Thank you for registering for KMUN. Your delegate ID is {delegate_id}.\n\n\
         First preference: {first_choice}\n\n\
         We will email you again once committees and portfolios are allocated.\n\n\
         KMUN Secretariat",
    );

    let html_body = wrap_html(
        "Registration received",
        &format!(
            "<p>Dear {name},</p>\
             <p>Thank you for registering for KMUN. Your delegate ID is <strong>{id}</strong>.</p>\
             <p>First preference: {choice}</p>\
             <p>We will email you again once committees and portfolios are allocated.</p>",
            name = html_escape(name),
            id = html_escape(delegate_id),
            choice = html_escape(&first_choice),
        ),
    );

    OutgoingEmail {
        to: registration.email.clone(),
        subject: "KMUN registration received".to_string(),
        html_body,
        text_body,
    }
}

/// Allocation notice; callers only send it once both committee and
/// portfolio are set
pub fn render_allocation_email(registration: &Registration) -> OutgoingEmail {
    let committee = registration.allocated_committee.as_deref().unwrap_or_default();
    let portfolio = registration.allocated_portfolio.as_deref().unwrap_or_default();
    let name = &registration.first_name;

    let text_body = format!(
        "Dear {name},\n\n\
         You have been allocated to {committee} representing {portfolio}.\n\n\
         Study guides and position paper deadlines will follow from your committee director.\n\n\
         KMUN Secretariat",
    );

    let html_body = wrap_html(
        "Your allocation",
        &format!(
            "<p>Dear {name},</p>\
             <p>You have been allocated to <strong>{committee}</strong> representing <strong>{portfolio}</strong>.</p>\
             <p>Study guides and position paper deadlines will follow from your committee director.</p>",
            name = html_escape(name),
            committee = html_escape(committee),
            portfolio = html_escape(portfolio),
        ),
    );

    OutgoingEmail {
        to: registration.email.clone(),
        subject: format!("KMUN allocation: {} - {}", committee, portfolio),
        html_body,
        text_body,
    }
}

fn wrap_html(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Georgia, 'Times New Roman', serif; background-color: #f5f5f5; margin: 0; }}
        .card {{ max-width: 560px; margin: 40px auto; background: #ffffff; border-radius: 8px; overflow: hidden; }}
        .header {{ background-color: #1e3a5f; color: #ffffff; padding: 24px; text-align: center; }}
        .content {{ padding: 24px; color: #374151; line-height: 1.6; }}
        .footer {{ padding: 16px 24px; color: #6b7280; font-size: 12px; text-align: center; }}
    </style>
</head>
<body>
    <div class="card">
        <div class="header"><h1>{title}</h1></div>
        <div class="content">{content}</div>
        <div class="footer">KMUN Secretariat</div>
    </div>
</body>
</html>"#,
        title = html_escape(title),
        content = content,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
