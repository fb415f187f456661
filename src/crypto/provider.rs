//! Encryption primitives behind a capability interface
//!
//! Three providers, one per `EncryptionStrength`:
//! - `AeadProvider`: AES-256-GCM (confidentiality + integrity)
//! - `HashStreamProvider`: SHA-256 counter keystream with an HMAC-SHA256
//!   tag, for environments without a native AEAD
//! - `LegacyXorProvider`: repeating-key XOR, decrypt only
//!
//! `ProviderSet` picks the providers once at startup; callers never branch
//! on platform.

use crate::config::LegacyPolicy;
use crate::crypto::{IV_SIZE, KEY_SIZE, MAC_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Strength of the path that produced an envelope, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionStrength {
    /// Repeating-key XOR. No integrity, weak confidentiality.
    Legacy,
    /// Hash-derived keystream with HMAC tag
    Degraded,
    /// AES-256-GCM
    Aead,
}

impl fmt::Display for EncryptionStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionStrength::Legacy => "legacy",
            EncryptionStrength::Degraded => "degraded",
            EncryptionStrength::Aead => "aead",
        };
        f.write_str(name)
    }
}

/// A symmetric encryption primitive
pub trait CryptoProvider: Send + Sync {
    /// The strength tag written into envelopes produced by this provider
    fn strength(&self) -> EncryptionStrength;

    /// Whether this provider authenticates ciphertext with a real AEAD
    fn supports_aead(&self) -> bool {
        self.strength() == EncryptionStrength::Aead
    }

    /// Encrypt `plaintext`; the returned bytes include any tag
    fn encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        plaintext: &[u8],
    ) -> Result<Vec<u8>>;

    /// Decrypt and authenticate; `AuthFailed` means nothing may be trusted
    fn decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>>;
}

/// AES-256-GCM
#[derive(Debug, Default, Clone, Copy)]
pub struct AeadProvider;

impl AeadProvider {
    /// Check that the AEAD implementation can be used on this platform
    pub fn probe() -> bool {
        UnboundKey::new(&AES_256_GCM, &[0u8; KEY_SIZE]).is_ok()
    }

    fn key(key: &[u8; KEY_SIZE]) -> Result<LessSafeKey> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| Error::Unsupported("AES-256-GCM key setup failed".to_string()))?;
        Ok(LessSafeKey::new(unbound_key))
    }
}

impl CryptoProvider for AeadProvider {
    fn strength(&self) -> EncryptionStrength {
        EncryptionStrength::Aead
    }

    fn encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let sealing_key = Self::key(key)?;
        let nonce = Nonce::assume_unique_for_key(*iv);

        // Prepare buffer: plaintext + space for tag
        let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
        in_out.extend_from_slice(plaintext);

        sealing_key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::Encryption("AES-256-GCM seal failed".to_string()))?;

        Ok(in_out)
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::AuthFailed);
        }

        let opening_key = Self::key(key)?;
        let nonce = Nonce::assume_unique_for_key(*iv);

        let mut in_out = Zeroizing::new(ciphertext.to_vec());
        let plaintext = opening_key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::AuthFailed)?;

        Ok(plaintext.to_vec())
    }
}

/// SHA-256 counter-mode keystream with HMAC-SHA256 over `iv || ciphertext`
#[derive(Debug, Default, Clone, Copy)]
pub struct HashStreamProvider;

const STREAM_DOMAIN: &[u8] = b"restvault-stream-v1";
const MAC_DOMAIN: &[u8] = b"restvault-mac-v1";

impl HashStreamProvider {
    fn subkey(domain: &[u8], key: &[u8; KEY_SIZE]) -> Zeroizing<Vec<u8>> {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(domain);
        ctx.update(key);
        Zeroizing::new(ctx.finish().as_ref().to_vec())
    }

    fn apply_keystream(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], data: &mut [u8]) {
        let stream_key = Self::subkey(STREAM_DOMAIN, key);
        for (counter, block) in data.chunks_mut(digest::SHA256_OUTPUT_LEN).enumerate() {
            let mut ctx = digest::Context::new(&digest::SHA256);
            ctx.update(&stream_key);
            ctx.update(iv);
            ctx.update(&(counter as u64).to_be_bytes());
            let pad = ctx.finish();
            for (byte, k) in block.iter_mut().zip(pad.as_ref()) {
                *byte ^= k;
            }
        }
    }

    fn mac_key(key: &[u8; KEY_SIZE]) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &Self::subkey(MAC_DOMAIN, key))
    }

    fn mac_input(iv: &[u8; IV_SIZE], body: &[u8]) -> Vec<u8> {
        let mut input = Vec::with_capacity(IV_SIZE + body.len());
        input.extend_from_slice(iv);
        input.extend_from_slice(body);
        input
    }
}

impl CryptoProvider for HashStreamProvider {
    fn strength(&self) -> EncryptionStrength {
        EncryptionStrength::Degraded
    }

    fn encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let mut out = plaintext.to_vec();
        Self::apply_keystream(key, iv, &mut out);

        let tag = hmac::sign(&Self::mac_key(key), &Self::mac_input(iv, &out));
        out.extend_from_slice(tag.as_ref());
        Ok(out)
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        iv: &[u8; IV_SIZE],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        if ciphertext.len() < MAC_SIZE {
            return Err(Error::AuthFailed);
        }

        let (body, tag) = ciphertext.split_at(ciphertext.len() - MAC_SIZE);
        hmac::verify(&Self::mac_key(key), &Self::mac_input(iv, body), tag)
            .map_err(|_| Error::AuthFailed)?;

        let mut out = body.to_vec();
        Self::apply_keystream(key, iv, &mut out);
        Ok(out)
    }
}

/// Length of the repeating key used by legacy envelopes
const LEGACY_KEY_LEN: usize = 16;

/// Repeating-key XOR. Only decrypts; new data is never written this way.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyXorProvider;

/// XOR `data` with the first `LEGACY_KEY_LEN` bytes of `key`, repeated
pub(crate) fn xor_repeating(key: &[u8; KEY_SIZE], data: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key[..LEGACY_KEY_LEN].iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect()
}

impl CryptoProvider for LegacyXorProvider {
    fn strength(&self) -> EncryptionStrength {
        EncryptionStrength::Legacy
    }

    fn encrypt(
        &self,
        _key: &[u8; KEY_SIZE],
        _iv: &[u8; IV_SIZE],
        _plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        Err(Error::Unsupported("legacy XOR is decrypt-only".to_string()))
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        _iv: &[u8; IV_SIZE],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        Ok(xor_repeating(key, ciphertext))
    }
}

/// The providers available in this process, selected once
#[derive(Clone)]
pub struct ProviderSet {
    aead: Option<Arc<dyn CryptoProvider>>,
    degraded: Arc<dyn CryptoProvider>,
    legacy: Arc<dyn CryptoProvider>,
}

impl ProviderSet {
    /// Probe the platform and build the provider set
    pub fn detect() -> Self {
        let aead: Option<Arc<dyn CryptoProvider>> = if AeadProvider::probe() {
            Some(Arc::new(AeadProvider))
        } else {
            warn!("AES-256-GCM unavailable, falling back to degraded encryption");
            None
        };
        debug!("Crypto providers selected (aead: {})", aead.is_some());
        Self::new(aead)
    }

    /// Provider set with an explicit (or absent) AEAD implementation
    pub fn new(aead: Option<Arc<dyn CryptoProvider>>) -> Self {
        ProviderSet {
            aead,
            degraded: Arc::new(HashStreamProvider),
            legacy: Arc::new(LegacyXorProvider),
        }
    }

    /// Provider set for environments without AEAD
    pub fn without_aead() -> Self {
        Self::new(None)
    }

    /// Whether an AEAD provider is available
    pub fn supports_aead(&self) -> bool {
        self.aead.as_ref().is_some_and(|p| p.supports_aead())
    }

    /// Strongest strength new envelopes can be written with
    pub fn best_strength(&self) -> EncryptionStrength {
        if self.supports_aead() {
            EncryptionStrength::Aead
        } else {
            EncryptionStrength::Degraded
        }
    }

    /// Provider able to decrypt envelopes of `strength`
    pub fn for_strength(&self, strength: EncryptionStrength) -> Option<&dyn CryptoProvider> {
        match strength {
            EncryptionStrength::Aead => self.aead.as_deref(),
            EncryptionStrength::Degraded => Some(self.degraded.as_ref()),
            EncryptionStrength::Legacy => Some(self.legacy.as_ref()),
        }
    }

    /// Provider for new envelopes
    pub fn for_encrypt(&self, allow_degraded: bool) -> Result<&dyn CryptoProvider> {
        if let Some(aead) = self.aead.as_deref() {
            return Ok(aead);
        }
        if allow_degraded {
            warn!("Encrypting with degraded strength: no AEAD provider");
            return Ok(self.degraded.as_ref());
        }
        Err(Error::Unsupported(
            "no AEAD provider and degraded encryption is disabled".to_string(),
        ))
    }
}

/// Decrypt-side policy over envelope strengths
#[derive(Debug, Clone, Copy)]
pub struct StrengthPolicy {
    legacy: LegacyPolicy,
}

impl StrengthPolicy {
    pub fn new(legacy: LegacyPolicy) -> Self {
        StrengthPolicy { legacy }
    }

    /// Decide whether data of `strength` may be decrypted
    pub fn check(&self, strength: EncryptionStrength) -> Result<()> {
        match (strength, self.legacy) {
            (EncryptionStrength::Legacy, LegacyPolicy::Reject) => Err(Error::PolicyRejected(
                "legacy XOR envelopes are rejected".to_string(),
            )),
            (EncryptionStrength::Legacy, LegacyPolicy::Accept) => {
                warn!("Decrypting legacy XOR envelope; re-encrypt to upgrade");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
