//! Error types for the Gatekeeper rate limiter.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors, including invalid limits
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors reported by the shared store client
    #[error("Shared store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The shared store did not answer within the bounded timeout
    #[error("Shared store timed out after {0:?}")]
    Timeout(Duration),

    /// The shared store answered with an unexpected reply shape
    #[error("Malformed shared store response: {0}")]
    MalformedResponse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GatekeeperError {
    fn from(err: ::config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
