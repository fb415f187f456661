//! Envelope encryption service
//!
//! encrypt: master key -> fresh salt + IV -> derived key -> provider -> Envelope
//! decrypt: Envelope -> master key -> re-derived key -> provider for the
//! envelope's declared strength
//!
//! Derived keys live only for the duration of one call. KDF parameters come
//! from the envelope version, never from configuration.

use crate::config::EncryptionConfig;
use crate::crypto::{
    derive_key, Envelope, EnvelopeVersion, KdfParams, KeyStore, ProviderSet, StrengthPolicy,
    IV_SIZE, SALT_SIZE,
};
use crate::error::{Error, Result};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Encrypts and decrypts byte payloads as envelopes
pub struct CipherService {
    keys: Arc<KeyStore>,
    providers: ProviderSet,
    policy: StrengthPolicy,
    allow_degraded: bool,
    #[cfg(test)]
    kdf_override: Option<KdfParams>,
}

impl CipherService {
    /// Create a service from configuration and an injected provider set
    pub fn new(keys: Arc<KeyStore>, providers: ProviderSet, config: &EncryptionConfig) -> Self {
        CipherService {
            keys,
            providers,
            policy: StrengthPolicy::new(config.legacy_policy),
            allow_degraded: config.allow_degraded_encrypt,
            #[cfg(test)]
            kdf_override: None,
        }
    }

    /// Derive every key with `params` instead of the per-version set
    #[cfg(test)]
    pub(crate) fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_override = Some(params);
        self
    }

    fn kdf_params(&self, version: EnvelopeVersion) -> KdfParams {
        #[cfg(test)]
        if let Some(params) = self.kdf_override {
            return params;
        }
        version.kdf_params()
    }

    /// The key store backing this service
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Encrypt `plaintext` into a new envelope with fresh salt and IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope> {
        let master = self.keys.get_or_create_master_key()?;
        let provider = self.providers.for_encrypt(self.allow_degraded)?;

        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let version = EnvelopeVersion::for_strength(provider.strength());
        let derived = derive_key(&master, &salt, self.kdf_params(version))?;
        let ciphertext = provider.encrypt(derived.key(), &iv, plaintext)?;

        debug!(
            "Encrypted {} bytes ({})",
            plaintext.len(),
            provider.strength()
        );

        Ok(Envelope {
            version,
            salt,
            iv,
            ciphertext,
        })
    }

    /// Decrypt an envelope
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let strength = envelope.strength();
        self.policy.check(strength)?;

        let master = self.keys.get_master_key()?.ok_or(Error::NoKey)?;
        let provider = self.providers.for_strength(strength).ok_or_else(|| {
            Error::Unsupported(format!("no provider for {} envelopes", strength))
        })?;

        let derived = derive_key(&master, &envelope.salt, self.kdf_params(envelope.version))?;
        let plaintext = provider.decrypt(derived.key(), &envelope.iv, &envelope.ciphertext)?;

        debug!("Decrypted {} bytes ({})", plaintext.len(), strength);
        Ok(plaintext)
    }

    /// Encrypt and encode to the wire format
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        Ok(self.encrypt(plaintext)?.encode())
    }

    /// Decode from the wire format and decrypt
    pub fn open(&self, encoded: &str) -> Result<Vec<u8>> {
        let envelope = Envelope::decode(encoded)?;
        self.decrypt(&envelope)
    }

    /// Encrypt a UTF-8 string
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.seal(plaintext.as_bytes())
    }

    /// Decrypt a string sealed with `encrypt_str`
    pub fn decrypt_str(&self, encoded: &str) -> Result<String> {
        let bytes = self.open(encoded)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::Serialization("decrypted payload is not UTF-8".to_string()))
    }

    /// Serialize a value as JSON and encrypt it
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = Zeroizing::new(serde_json::to_vec(value)?);
        self.seal(&json)
    }

    /// Decrypt and deserialize a value sealed with `encrypt_json`
    pub fn decrypt_json<T: DeserializeOwned>(&self, encoded: &str) -> Result<T> {
        let json = Zeroizing::new(self.open(encoded)?);
        Ok(serde_json::from_slice(&json)?)
    }

    /// Whether an envelope was written below the strength now available
    pub fn needs_upgrade(&self, envelope: &Envelope) -> bool {
        envelope.strength() < self.providers.best_strength()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LegacyPolicy;
    use crate::crypto::provider::xor_repeating;
    use crate::crypto::{AeadProvider, CryptoProvider, EncryptionStrength};
    use crate::storage::MemorySecureStorage;
    use serde::Deserialize;

    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    fn test_config() -> EncryptionConfig {
        EncryptionConfig::default()
    }

    fn service_with(providers: ProviderSet, config: &EncryptionConfig) -> CipherService {
        let keys = Arc::new(KeyStore::new(
            Arc::new(MemorySecureStorage::new()),
            "test@host",
        ));
        CipherService::new(keys, providers, config).with_kdf_params(FAST)
    }

    fn service() -> CipherService {
        service_with(ProviderSet::detect(), &test_config())
    }

    #[test]
    fn test_roundtrip() {
        let cipher = service();
        for plaintext in [&b""[..], b"a", b"health record: bp 120/80"] {
            let envelope = cipher.encrypt(plaintext).unwrap();
            assert_eq!(envelope.strength(), EncryptionStrength::Aead);
            assert_eq!(cipher.decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_roundtrip_multi_megabyte() {
        let cipher = service();
        let plaintext: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let sealed = cipher.seal(&plaintext).unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_ciphertext_not_deterministic() {
        let cipher = service();
        let a = cipher.encrypt(b"same plaintext").unwrap();
        let b = cipher.encrypt(b"same plaintext").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_every_bit_flip_detected() {
        let cipher = service();
        let envelope = cipher.encrypt(b"tamper me").unwrap();

        for byte in 0..envelope.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(cipher.decrypt(&tampered), Err(Error::AuthFailed)));
            }
        }
    }

    #[test]
    fn test_salt_tamper_detected() {
        let cipher = service();
        let mut envelope = cipher.encrypt(b"payload").unwrap();
        envelope.salt[0] ^= 0x01;
        assert!(matches!(cipher.decrypt(&envelope), Err(Error::AuthFailed)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let cipher = service();
        let sealed = cipher.seal(b"payload").unwrap();
        let bumped = format!("7{}", &sealed[1..]);
        assert!(matches!(
            cipher.open(&bumped),
            Err(Error::Format(crate::error::FormatError::UnsupportedVersion(_)))
        ));
    }

    #[test]
    fn test_no_key_on_decrypt() {
        let storage = Arc::new(MemorySecureStorage::new());
        let keys = Arc::new(KeyStore::new(storage, "test@host"));
        let cipher = CipherService::new(keys.clone(), ProviderSet::detect(), &test_config())
            .with_kdf_params(FAST);

        let envelope = cipher.encrypt(b"payload").unwrap();
        keys.wipe_master_key().unwrap();

        assert!(matches!(cipher.decrypt(&envelope), Err(Error::NoKey)));
        // Decrypt never creates a key
        assert!(!keys.has_master_key().unwrap());
    }

    #[test]
    fn test_degraded_roundtrip_and_tag() {
        let cipher = service_with(ProviderSet::without_aead(), &test_config());
        let sealed = cipher.seal(b"fallback path").unwrap();
        assert!(sealed.starts_with("fallback.1."));
        assert_eq!(cipher.open(&sealed).unwrap(), b"fallback path");

        let mut envelope = Envelope::decode(&sealed).unwrap();
        envelope.ciphertext[0] ^= 0x10;
        assert!(matches!(cipher.decrypt(&envelope), Err(Error::AuthFailed)));
    }

    #[test]
    fn test_degraded_disabled() {
        let config = EncryptionConfig {
            allow_degraded_encrypt: false,
            ..test_config()
        };
        let cipher = service_with(ProviderSet::without_aead(), &config);
        assert!(matches!(cipher.encrypt(b"x"), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_aead_envelope_unreadable_without_aead() {
        let storage = Arc::new(MemorySecureStorage::new());
        let keys = Arc::new(KeyStore::new(storage, "test@host"));
        let strong = CipherService::new(keys.clone(), ProviderSet::detect(), &test_config())
            .with_kdf_params(FAST);
        let weak = CipherService::new(keys, ProviderSet::without_aead(), &test_config())
            .with_kdf_params(FAST);

        let envelope = strong.encrypt(b"payload").unwrap();
        assert!(matches!(weak.decrypt(&envelope), Err(Error::Unsupported(_))));
    }

    fn legacy_envelope(cipher: &CipherService, plaintext: &[u8]) -> Envelope {
        let master = cipher.key_store().get_or_create_master_key().unwrap();
        let salt = [5u8; SALT_SIZE];
        let params = cipher.kdf_params(EnvelopeVersion::FallbackV0);
        let derived = derive_key(&master, &salt, params).unwrap();
        Envelope {
            version: EnvelopeVersion::FallbackV0,
            salt,
            iv: [0u8; IV_SIZE],
            ciphertext: xor_repeating(derived.key(), plaintext),
        }
    }

    #[test]
    fn test_legacy_policy() {
        let accept = service();
        let envelope = legacy_envelope(&accept, b"old data");
        assert_eq!(accept.decrypt(&envelope).unwrap(), b"old data");
        assert!(accept.needs_upgrade(&envelope));

        let config = EncryptionConfig {
            legacy_policy: LegacyPolicy::Reject,
            ..test_config()
        };
        let reject = service_with(ProviderSet::detect(), &config);
        let envelope = legacy_envelope(&reject, b"old data");
        assert!(matches!(
            reject.decrypt(&envelope),
            Err(Error::PolicyRejected(_))
        ));
    }

    #[test]
    fn test_kdf_params_follow_envelope_version() {
        let keys = Arc::new(KeyStore::new(
            Arc::new(MemorySecureStorage::new()),
            "test@host",
        ));
        let writer = CipherService::new(keys.clone(), ProviderSet::detect(), &test_config());
        let envelope = writer.encrypt(b"written once").unwrap();

        let master = keys.get_master_key().unwrap().unwrap();
        let derived = derive_key(&master, &envelope.salt, KdfParams::PBKDF2_100K).unwrap();
        let plaintext = AeadProvider
            .decrypt(derived.key(), &envelope.iv, &envelope.ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"written once");

        let reader_config = EncryptionConfig {
            allow_degraded_encrypt: false,
            legacy_policy: LegacyPolicy::Reject,
            app_id: "another-build".to_string(),
        };
        let reader = CipherService::new(keys, ProviderSet::detect(), &reader_config);
        assert_eq!(reader.decrypt(&envelope).unwrap(), b"written once");
    }

    #[test]
    fn test_needs_upgrade() {
        let cipher = service();
        let envelope = cipher.encrypt(b"x").unwrap();
        assert!(!cipher.needs_upgrade(&envelope));

        let weak = service_with(ProviderSet::without_aead(), &test_config());
        let degraded = weak.encrypt(b"x").unwrap();
        assert!(cipher.needs_upgrade(&degraded));
        assert!(!weak.needs_upgrade(&degraded));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct WeightEntry {
        day: String,
        kg: f32,
    }

    #[test]
    fn test_typed_helpers() {
        let cipher = service();

        let sealed = cipher.encrypt_str("resting hr 58").unwrap();
        assert_eq!(cipher.decrypt_str(&sealed).unwrap(), "resting hr 58");

        let entry = WeightEntry {
            day: "2026-10-18".to_string(),
            kg: 71.5,
        };
        let sealed = cipher.encrypt_json(&entry).unwrap();
        let restored: WeightEntry = cipher.decrypt_json(&sealed).unwrap();
        assert_eq!(restored, entry);
    }
}
