//! Error types for dormwatch

use thiserror::Error;

/// Result type alias using dormwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for dormwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP transport construction error
    #[error("SMTP setup error: {0}")]
    Smtp(String),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an SMTP setup error
    pub fn smtp(msg: impl Into<String>) -> Self {
        Self::Smtp(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
