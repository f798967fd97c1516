//! Error types for the vigil_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vigil_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An action that needs a logged-in user was attempted without one
    #[error("You must be logged in to {0}")]
    AuthRequired(String),

    /// Store or remote API read/write failure (including timeouts)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Lookup target does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an unusable value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Fetch(format!("request timed out: {}", e))
        } else {
            Error::Fetch(e.to_string())
        }
    }
}

impl Error {
    /// True for failures the user can recover from by retrying or logging in.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AuthRequired(_) | Error::Fetch(_) | Error::NotFound(_) | Error::InvalidInput(_)
        )
    }
}
