//! restvault - Device-local encryption at rest
//!
//! Sensitive records and files are sealed into versioned envelopes under a
//! master key held in platform secure storage. Files live in an encrypted
//! vault with tamper-evident sidecars and are removed by multi-pass secure
//! erasure.

pub mod config;
pub mod crypto;
pub mod erase;
pub mod error;
pub mod logging;
pub mod storage;
pub mod vault;

pub use config::Config;
pub use error::{Error, FormatError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::{CipherService, EncryptionStrength, Envelope, KeyStore};
    pub use crate::erase::{SecureEraser, WipeReport};
    pub use crate::error::{Error, Result};
    pub use crate::vault::{EncryptedFileRecord, FileVault};
}
