//! Mail transport capability
//!
//! The worker never owns a transport; it receives a `MailSender` handle
//! built once at startup. Success means the relay accepted the message,
//! not that it was delivered.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reachmail_common::config::SmtpConfig;
use reachmail_common::{Error, Result};
use uuid::Uuid;

/// Transport acceptance metadata
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: String,
    /// Out-of-band link to inspect a test-SMTP-accepted message
    pub preview_url: Option<String>,
}

/// Outbound mail capability
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<SendOutcome>;
}

/// SMTP-backed sender over a relay configured at startup
pub struct SmtpMailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| Error::Transport(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        }
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let transport = builder.timeout(Some(Duration::from_secs(30))).build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<SendOutcome> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| Error::Transport(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| Error::Transport(format!("Invalid to address: {}", e)))?;

        let message_id = format!("<{}.{}@reachmail>", Uuid::new_v4(), Utc::now().timestamp());

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::Transport(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(SendOutcome {
            message_id,
            preview_url: None,
        })
    }
}
