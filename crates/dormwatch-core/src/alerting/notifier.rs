//! Notification delivery over SMTP

use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::models::AlertMessage;

/// Display name on outgoing mail
const SENDER_NAME: &str = "Dormwatch";

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP replies meaning the login was refused
const AUTH_FAILURE_CODES: [&str; 3] = ["530", "534", "535"];

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Login refused; the password or authorization code is wrong
    #[error("SMTP authentication failed: {0}")]
    Auth(String),

    /// Could not reach or talk to the relay
    #[error("SMTP connection failed: {0}")]
    Connection(String),

    /// Relay refused the message permanently
    #[error("SMTP server rejected the message: {0}")]
    Rejected(String),

    /// Message could not be assembled
    #[error("could not build message: {0}")]
    Message(String),
}

/// Anything that can deliver an alert
#[async_trait::async_trait]
pub trait AlertSender: Send + Sync {
    /// Deliver one message, reporting whether it went out
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// Sends alerts through an authenticated SMTP relay
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    /// Create a notifier from the loaded configuration
    pub fn new(config: &Config) -> crate::error::Result<Self> {
        let builder = if config.smtp_use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
        }
        .map_err(|e| Error::smtp(e.to_string()))?;

        let mailer = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender_email.clone(),
                config.sender_password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        let from = parse_address(&config.sender_email, "sender")?;
        let to = parse_address(&config.receiver_email, "receiver")?;

        Ok(Self {
            mailer,
            from: Mailbox::new(Some(SENDER_NAME.to_string()), from),
            to: Mailbox::new(None, to),
        })
    }

    fn build(&self, message: &AlertMessage) -> Result<Message, NotifyError> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| NotifyError::Message(e.to_string()))
    }
}

#[async_trait::async_trait]
impl AlertSender for EmailNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let email = self.build(message)?;

        debug!(to = %self.to, kind = ?message.kind, "Sending email");
        self.mailer.send(email).await.map_err(classify)?;

        info!(to = %self.to, kind = ?message.kind, "Email sent");
        Ok(())
    }
}

fn parse_address(raw: &str, role: &str) -> crate::error::Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| Error::smtp(format!("invalid {role} address '{raw}': {e}")))
}

fn classify(err: lettre::transport::smtp::Error) -> NotifyError {
    let code = err.status().map(|c| c.to_string());

    match code {
        Some(code) if AUTH_FAILURE_CODES.contains(&code.as_str()) => NotifyError::Auth(err.to_string()),
        Some(_) if err.is_permanent() => NotifyError::Rejected(err.to_string()),
        _ => NotifyError::Connection(err.to_string()),
    }
}
