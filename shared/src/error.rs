//! Error types for the booking functions.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the booking functions.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error talking to the document database or telemetry collector
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the document database
    #[error("Store error ({status}): {message}")]
    Store { status: u16, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Short name of the variant, reported as the exception type to telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Http(_) => "HttpError",
            Error::Store { .. } => "StoreError",
            Error::Config(_) => "ConfigError",
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFoundError",
            Error::Serialization(_) => "SerializationError",
            Error::Internal(_) => "InternalError",
        }
    }
}
