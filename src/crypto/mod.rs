//! Cryptography module for restvault
//!
//! Envelope encryption of arbitrary byte payloads:
//! a random 256-bit master key held by `KeyStore`, a per-payload key
//! derived with PBKDF2-HMAC-SHA256 from a fresh salt, and AES-256-GCM
//! (or a tagged weaker fallback) for the payload itself.

mod cipher;
mod envelope;
mod kdf;
mod keys;
mod provider;

pub use cipher::CipherService;
pub use envelope::{decode, encode, Envelope, EnvelopeVersion};
pub use kdf::{derive_key, DerivedKey, KdfParams, PBKDF2_ITERATIONS};
pub use keys::{environment_fingerprint, KeyStore, MasterKey};
pub use provider::{
    AeadProvider, CryptoProvider, EncryptionStrength, HashStreamProvider, LegacyXorProvider,
    ProviderSet, StrengthPolicy,
};

/// Size of master and derived keys in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the per-envelope salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of the per-envelope IV/nonce in bytes
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of the HMAC-SHA256 tag used by the degraded provider
pub const MAC_SIZE: usize = 32;
