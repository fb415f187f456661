//! Error types for restvault

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Envelope codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(String),
}

/// Main error type for restvault
#[derive(Error, Debug)]
pub enum Error {
    // Key store errors
    #[error("Secure storage unavailable: {0}")]
    KeyStoreUnavailable(String),

    #[error("Master key integrity check failed")]
    IntegrityCheckFailed,

    #[error("No master key present")]
    NoKey,

    // Crypto errors
    #[error("Authentication failed - data tampered or wrong key")]
    AuthFailed,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Rejected by strength policy: {0}")]
    PolicyRejected(String),

    // Codec errors
    #[error(transparent)]
    Format(#[from] FormatError),

    // Vault errors
    #[error("Content integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Vault not initialized")]
    NotInitialized,

    // Erase errors
    #[error("Secure delete degraded for {path:?}: {reason}")]
    SecureDeleteDegraded { path: PathBuf, reason: String },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error means the data must not be trusted
    pub fn is_untrusted_data(&self) -> bool {
        matches!(self, Error::AuthFailed | Error::IntegrityMismatch { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
