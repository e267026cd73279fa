//! Alert data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

/// What an outgoing email is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Balance dropped below the threshold
    LowBalance,
    /// The portal rejected the session cookie
    AuthExpired,
    /// Several cycles in a row failed to read the balance
    RepeatedFailures,
    /// Manually requested SMTP check
    Test,
}

/// A rendered email ready to hand to a sender
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    /// What the message is about
    pub kind: AlertKind,

    /// Severity level
    pub severity: Severity,

    /// Email subject line
    pub subject: String,

    /// HTML body
    pub html_body: String,
}

/// In-memory record of what has already been sent.
///
/// Only successful sends are recorded, so a failed send is retried on the
/// next cycle regardless of cooldown. Nothing here survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    /// Last successful low-balance email
    pub last_alert_at: Option<DateTime<Utc>>,

    /// Last successful repeated-failure email
    pub last_failure_alert_at: Option<DateTime<Utc>>,

    /// Whether the operator was already told about the current cookie expiry
    pub auth_expiry_notified: bool,
}

impl AlertState {
    /// Record a successfully delivered message
    pub fn record_sent(&mut self, kind: AlertKind, at: DateTime<Utc>) {
        match kind {
            AlertKind::LowBalance => self.last_alert_at = Some(at),
            AlertKind::RepeatedFailures => self.last_failure_alert_at = Some(at),
            AlertKind::AuthExpired => self.auth_expiry_notified = true,
            AlertKind::Test => {}
        }
    }

    /// A successful fetch means any earlier cookie expiry has been fixed
    pub fn clear_auth_expiry(&mut self) {
        self.auth_expiry_notified = false;
    }
}
