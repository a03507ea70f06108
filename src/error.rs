//! Error types for Tallygate.

use thiserror::Error;

use crate::ratelimit::LimiterError;
use crate::store::StoreError;

/// Main error type for Tallygate operations outside the hot path.
#[derive(Error, Debug)]
pub enum TallygateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiting errors
    #[error(transparent)]
    Limiter(#[from] LimiterError),

    /// Counter store errors raised while opening or seeding a store
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TallygateError {
    fn from(err: config::ConfigError) -> Self {
        TallygateError::Config(err.to_string())
    }
}

/// Result type alias for Tallygate operations.
pub type Result<T> = std::result::Result<T, TallygateError>;
