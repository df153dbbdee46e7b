//! Error types for the DNA reconciler
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DNA reconciler
#[derive(Error, Debug)]
pub enum Error {
    /// Name resolution errors
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Traffic source errors (export failed, query failed)
    #[error("Traffic source error: {0}")]
    Traffic(String),

    /// Address list store errors (export, import, delete)
    #[error("Address list store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ownership arbitration could not pick a winner
    ///
    /// This is a logic invariant violation and aborts the run.
    #[error("Arbitration error: {0}")]
    Arbitration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a name resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a traffic source error
    pub fn traffic(msg: impl Into<String>) -> Self {
        Self::Traffic(msg.into())
    }

    /// Create an address list store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an arbitration error
    pub fn arbitration(msg: impl Into<String>) -> Self {
        Self::Arbitration(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
