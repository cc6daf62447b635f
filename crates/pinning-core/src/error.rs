//! Error types for the pinning core

use thiserror::Error;

/// Result type alias using PinningError
pub type Result<T> = std::result::Result<T, PinningError>;

/// Errors that can occur while loading keys, canonicalizing or signing
#[derive(Error, Debug)]
pub enum PinningError {
    /// Signing key could not be read or parsed (missing file, bad PEM,
    /// non-RSA algorithm)
    #[error("failed to load signing key: {0}")]
    KeyLoad(String),

    /// Payload was not valid JSON or could not be canonicalized
    #[error("failed to canonicalize JSON: {0}")]
    Canonicalization(String),

    /// The RSA signature operation itself failed
    #[error("failed to sign payload: {0}")]
    Sign(String),

    /// Manifest serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PinningError {
    fn from(err: serde_json::Error) -> Self {
        PinningError::Serialization(err.to_string())
    }
}
