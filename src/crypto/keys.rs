//! Master key management
//!
//! The master key is a random 256-bit secret, created lazily and held only
//! in platform secure storage. On storage that is not hardware-backed, a
//! key binding (HMAC of the key under the environment fingerprint) is
//! stored beside it and checked on every load; a mismatch fails closed.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use crate::storage::SecureStorage;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::hmac;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Secure storage entry holding the master key
const MASTER_KEY_ENTRY: &str = "restvault.master-key";

/// Secure storage entry holding the key binding
const KEY_BINDING_ENTRY: &str = "restvault.key-binding";

/// Master key material
pub struct MasterKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// Generate a new random key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut key[..]);
        MasterKey { key }
    }

    /// Create from stored key material
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(MasterKey { key })
    }

    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([redacted])")
    }
}

/// Fingerprint of the environment the key is bound to
pub fn environment_fingerprint(app_id: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}@{}", app_id, host)
}

/// Result of loading the key from storage
enum Loaded {
    Present(MasterKey),
    Absent,
    Tampered,
}

/// Owner of the master key lifecycle
pub struct KeyStore {
    storage: Arc<dyn SecureStorage>,
    fingerprint: String,
}

impl KeyStore {
    /// Create a key store over `storage`, binding keys to `fingerprint`
    pub fn new(storage: Arc<dyn SecureStorage>, fingerprint: impl Into<String>) -> Self {
        KeyStore {
            storage,
            fingerprint: fingerprint.into(),
        }
    }

    fn binding_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, self.fingerprint.as_bytes())
    }

    fn needs_binding(&self) -> bool {
        !self.storage.is_hardware_backed()
    }

    fn load(&self) -> Result<Loaded> {
        let stored = match self.storage.get(MASTER_KEY_ENTRY)? {
            Some(bytes) => bytes,
            None => return Ok(Loaded::Absent),
        };

        let key = match MasterKey::from_bytes(&stored) {
            Ok(key) => key,
            Err(_) => {
                warn!("Stored master key has invalid length {}", stored.len());
                return Ok(Loaded::Tampered);
            }
        };

        if self.needs_binding() {
            let binding = match self.storage.get(KEY_BINDING_ENTRY)? {
                Some(binding) => binding,
                None => {
                    warn!("Master key present without key binding");
                    return Ok(Loaded::Tampered);
                }
            };
            if hmac::verify(&self.binding_key(), key.key(), &binding).is_err() {
                warn!("Master key binding mismatch");
                return Ok(Loaded::Tampered);
            }
        }

        Ok(Loaded::Present(key))
    }

    fn persist(&self, key: &MasterKey) -> Result<()> {
        self.storage.set(MASTER_KEY_ENTRY, key.key())?;
        if self.needs_binding() {
            let binding = hmac::sign(&self.binding_key(), key.key());
            self.storage.set(KEY_BINDING_ENTRY, binding.as_ref())?;
        }
        Ok(())
    }

    /// The master key, if present and intact.
    ///
    /// A key that fails its integrity check is reported as absent.
    pub fn get_master_key(&self) -> Result<Option<MasterKey>> {
        match self.load()? {
            Loaded::Present(key) => Ok(Some(key)),
            Loaded::Absent => Ok(None),
            Loaded::Tampered => Ok(None),
        }
    }

    /// Whether an intact master key exists
    pub fn has_master_key(&self) -> Result<bool> {
        Ok(matches!(self.load()?, Loaded::Present(_)))
    }

    /// Return the master key, creating it on first use.
    ///
    /// Never replaces a key that failed its integrity check; that returns
    /// `IntegrityCheckFailed` and the caller must opt in to
    /// `regenerate_master_key`.
    pub fn get_or_create_master_key(&self) -> Result<MasterKey> {
        match self.load()? {
            Loaded::Present(key) => Ok(key),
            Loaded::Tampered => Err(Error::IntegrityCheckFailed),
            Loaded::Absent => {
                let key = MasterKey::generate();
                self.persist(&key)?;
                info!("Created new master key");
                Ok(key)
            }
        }
    }

    /// Whether a master key exists and passes its integrity check
    pub fn verify_key_integrity(&self) -> Result<bool> {
        Ok(matches!(self.load()?, Loaded::Present(_)))
    }

    /// Replace the master key unconditionally.
    ///
    /// Every envelope under the old key becomes undecryptable.
    pub fn regenerate_master_key(&self) -> Result<MasterKey> {
        self.wipe_master_key()?;
        let key = MasterKey::generate();
        self.persist(&key)?;
        warn!("Master key regenerated; existing envelopes are unreadable");
        Ok(key)
    }

    /// Delete the master key and its binding. Irreversible.
    pub fn wipe_master_key(&self) -> Result<()> {
        self.storage.delete(MASTER_KEY_ENTRY)?;
        self.storage.delete(KEY_BINDING_ENTRY)?;
        debug!("Master key wiped");
        Ok(())
    }
}
