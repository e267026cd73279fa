//! # dormwatch
//!
//! Dormitory electricity balance monitor.
//!
//! dormwatch polls a utility portal for the remaining electricity balance
//! using the operator's session cookie and sends an email when the balance
//! drops below a threshold, at most once per cooldown window.
//!
//! ## Architecture
//!
//! - **Fetcher**: authenticated balance query with bounded retry
//! - **Alerting**: threshold/cooldown decision and SMTP delivery
//! - **Monitor**: the single-threaded polling loop tying both together
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the monitor
//! USER_COOKIE=... SENDER_EMAIL=... SENDER_PASSWORD=... RECEIVER_EMAIL=... dormwatch
//!
//! # One check, then exit
//! dormwatch check
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod alerting;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod monitor;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{AlertSender, EmailNotifier};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fetcher::{BalanceSource, FetchError, PortalClient};
    pub use crate::models::*;
    pub use crate::monitor::{CycleOutcome, Monitor, MonitorSettings};
}
