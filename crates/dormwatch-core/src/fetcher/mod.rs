//! Balance fetching from the utility portal
//!
//! A fetch either yields a [`BalanceReading`] or a classified [`FetchError`].
//! Only network errors are retried; an expired session needs the operator to
//! paste a fresh cookie, and a malformed response is simply skipped until the
//! next cycle.

mod portal;
mod retry;

pub use portal::PortalClient;
pub use retry::{retry_with_backoff, RetryPolicy};

use crate::models::BalanceReading;

/// Fetch failure classes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Timeout, refused connection, or a 429/5xx from the portal
    #[error("network error: {0}")]
    Network(String),

    /// The portal no longer accepts the session cookie
    #[error("session expired: {0}")]
    AuthExpired(String),

    /// The response did not contain a usable balance
    #[error("unexpected response: {0}")]
    Parse(String),
}

/// Fieldless mirror of [`FetchError`] for outcomes and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// See [`FetchError::Network`]
    Network,
    /// See [`FetchError::AuthExpired`]
    AuthExpired,
    /// See [`FetchError::Parse`]
    Parse,
}

impl FetchError {
    /// Whether another attempt within the same cycle might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The failure class without its detail
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Network(_) => FetchErrorKind::Network,
            Self::AuthExpired(_) => FetchErrorKind::AuthExpired,
            Self::Parse(_) => FetchErrorKind::Parse,
        }
    }
}

/// Anything that can produce a balance reading
#[async_trait::async_trait]
pub trait BalanceSource: Send + Sync {
    /// Fetch the current balance, retrying transient failures internally
    async fn fetch(&self) -> Result<BalanceReading, FetchError>;
}
