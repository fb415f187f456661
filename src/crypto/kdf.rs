//! Per-envelope key derivation
//!
//! PBKDF2-HMAC-SHA256 over the master key with the envelope's salt.
//! Derivation is deterministic, so decrypt re-derives the same key from
//! the salt stored in the envelope. The parameter set is fixed per
//! envelope version (`EnvelopeVersion::kdf_params`) and never configurable.

use crate::crypto::{MasterKey, KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use ring::pbkdf2;
use std::num::NonZeroU32;
use zeroize::Zeroizing;

/// PBKDF2 iterations for every envelope version written so far
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed KDF parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// PBKDF2 iteration count
    pub iterations: u32,
}

impl KdfParams {
    pub const PBKDF2_100K: KdfParams = KdfParams {
        iterations: PBKDF2_ITERATIONS,
    };
}

/// Key derived for a single encrypt/decrypt call; zeroed on drop
pub struct DerivedKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DerivedKey {
    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([redacted])")
    }
}

/// Derive the envelope key for `salt`
pub fn derive_key(
    master: &MasterKey,
    salt: &[u8; SALT_SIZE],
    params: KdfParams,
) -> Result<DerivedKey> {
    let iterations = NonZeroU32::new(params.iterations)
        .ok_or_else(|| Error::KeyDerivation("Iteration count must be non-zero".to_string()))?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        master.key(),
        &mut key[..],
    );

    Ok(DerivedKey { key })
}
