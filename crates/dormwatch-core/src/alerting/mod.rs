//! Alerting for dormwatch
//!
//! Decides when a low balance warrants an email and delivers it.

mod decider;
pub mod message;
mod notifier;

pub use decider::{cooldown_elapsed, should_alert};
pub use notifier::{AlertSender, EmailNotifier, NotifyError};
