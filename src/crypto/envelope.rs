//! Versioned envelope wire format
//!
//! ASCII, dot-delimited, standard base64 fields:
//!
//! ```text
//! 1.<salt>.<iv>.<ciphertext>             AES-256-GCM
//! fallback.1.<salt>.<iv>.<ciphertext>    hash keystream + HMAC
//! fallback.0.<salt>.<iv>.<ciphertext>    legacy XOR
//! ```
//!
//! Decoding dispatches on the version token before anything else is
//! parsed. The format is a persistent compatibility contract: new versions
//! get new tokens, existing tokens never change meaning.

use crate::crypto::{EncryptionStrength, KdfParams, IV_SIZE, SALT_SIZE};
use crate::error::FormatError;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Marker segment for envelopes written by a non-AEAD path
const FALLBACK_MARKER: &str = "fallback";

/// Segment delimiter
const DELIMITER: char = '.';

/// Every version this build can parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeVersion {
    /// `1.` AES-256-GCM
    V1,
    /// `fallback.1.` hash keystream
    FallbackV1,
    /// `fallback.0.` legacy XOR
    FallbackV0,
}

impl EnvelopeVersion {
    /// Version written for a given strength
    pub fn for_strength(strength: EncryptionStrength) -> Self {
        match strength {
            EncryptionStrength::Aead => EnvelopeVersion::V1,
            EncryptionStrength::Degraded => EnvelopeVersion::FallbackV1,
            EncryptionStrength::Legacy => EnvelopeVersion::FallbackV0,
        }
    }

    /// Strength declared by this version
    pub fn strength(self) -> EncryptionStrength {
        match self {
            EnvelopeVersion::V1 => EncryptionStrength::Aead,
            EnvelopeVersion::FallbackV1 => EncryptionStrength::Degraded,
            EnvelopeVersion::FallbackV0 => EncryptionStrength::Legacy,
        }
    }

    /// Leading segments identifying this version on the wire
    pub fn header(self) -> &'static str {
        match self {
            EnvelopeVersion::V1 => "1",
            EnvelopeVersion::FallbackV1 => "fallback.1",
            EnvelopeVersion::FallbackV0 => "fallback.0",
        }
    }

    /// KDF parameters every envelope of this version was derived with.
    ///
    /// Part of the wire contract: changing a value here makes existing
    /// envelopes of that version undecryptable. New parameters need a new
    /// version token.
    pub fn kdf_params(self) -> KdfParams {
        match self {
            EnvelopeVersion::V1 | EnvelopeVersion::FallbackV1 | EnvelopeVersion::FallbackV0 => {
                KdfParams::PBKDF2_100K
            }
        }
    }

    /// Identify the version from the leading segments alone, without
    /// validating the rest of the envelope
    pub fn sniff(input: &str) -> Option<Self> {
        [
            EnvelopeVersion::V1,
            EnvelopeVersion::FallbackV1,
            EnvelopeVersion::FallbackV0,
        ]
        .into_iter()
        .find(|v| {
            input
                .strip_prefix(v.header())
                .is_some_and(|rest| rest.starts_with(DELIMITER))
        })
    }
}

/// One encrypted payload
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Selects the decode and decrypt path
    pub version: EnvelopeVersion,
    /// KDF salt, fresh per envelope
    pub salt: [u8; SALT_SIZE],
    /// Cipher IV/nonce, fresh per envelope
    pub iv: [u8; IV_SIZE],
    /// Ciphertext including any authentication tag
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("version", &self.version)
            .field("salt", &hex::encode(self.salt))
            .field("iv", &hex::encode(self.iv))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl Envelope {
    /// Strength that produced this envelope
    pub fn strength(&self) -> EncryptionStrength {
        self.version.strength()
    }

    /// Encode to the wire format
    pub fn encode(&self) -> String {
        encode(self.version, &self.salt, &self.iv, &self.ciphertext)
    }

    /// Decode from the wire format
    pub fn decode(input: &str) -> Result<Self, FormatError> {
        decode(input)
    }

    /// Decode from raw bytes; non-ASCII input is malformed
    pub fn from_bytes(input: &[u8]) -> Result<Self, FormatError> {
        let text = std::str::from_utf8(input)
            .map_err(|_| FormatError::Malformed("envelope is not ASCII".to_string()))?;
        decode(text)
    }
}

/// Encode envelope fields
pub fn encode(
    version: EnvelopeVersion,
    salt: &[u8; SALT_SIZE],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> String {
    format!(
        "{header}{d}{salt}{d}{iv}{d}{ct}",
        header = version.header(),
        d = DELIMITER,
        salt = STANDARD.encode(salt),
        iv = STANDARD.encode(iv),
        ct = STANDARD.encode(ciphertext),
    )
}

/// Decode envelope fields. Never falls back to best-effort parsing.
pub fn decode(input: &str) -> Result<Envelope, FormatError> {
    if input.is_empty() {
        return Err(FormatError::Malformed("empty envelope".to_string()));
    }
    if !input.is_ascii() {
        return Err(FormatError::Malformed("envelope is not ASCII".to_string()));
    }

    let segments: Vec<&str> = input.split(DELIMITER).collect();

    let (version, fields) = if segments[0] == FALLBACK_MARKER {
        let token = segments
            .get(1)
            .ok_or_else(|| FormatError::Malformed("missing fallback version".to_string()))?;
        let version = match parse_version_token(token)? {
            "1" => EnvelopeVersion::FallbackV1,
            "0" => EnvelopeVersion::FallbackV0,
            other => {
                return Err(FormatError::UnsupportedVersion(format!(
                    "{}.{}",
                    FALLBACK_MARKER, other
                )))
            }
        };
        (version, &segments[2..])
    } else {
        let version = match parse_version_token(segments[0])? {
            "1" => EnvelopeVersion::V1,
            other => return Err(FormatError::UnsupportedVersion(other.to_string())),
        };
        (version, &segments[1..])
    };

    if fields.len() != 3 {
        return Err(FormatError::Malformed(format!(
            "expected 3 fields after version header, got {}",
            fields.len()
        )));
    }

    Ok(Envelope {
        version,
        salt: decode_fixed(fields[0], "salt")?,
        iv: decode_fixed(fields[1], "iv")?,
        ciphertext: decode_field(fields[2], "ciphertext")?,
    })
}

fn parse_version_token(token: &str) -> Result<&str, FormatError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::Malformed(format!(
            "invalid version token '{}'",
            token
        )));
    }
    Ok(token)
}

fn decode_field(field: &str, name: &str) -> Result<Vec<u8>, FormatError> {
    STANDARD
        .decode(field)
        .map_err(|e| FormatError::Malformed(format!("{}: {}", name, e)))
}

fn decode_fixed<const N: usize>(field: &str, name: &str) -> Result<[u8; N], FormatError> {
    let bytes = decode_field(field, name)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        FormatError::Malformed(format!("{}: expected {} bytes, got {}", name, N, b.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version: EnvelopeVersion) -> Envelope {
        Envelope {
            version,
            salt: [0xA5; SALT_SIZE],
            iv: [0x3C; IV_SIZE],
            ciphertext: b"opaque ciphertext bytes".to_vec(),
        }
    }

    #[test]
    fn test_encode_layout() {
        let encoded = sample(EnvelopeVersion::V1).encode();
        let parts: Vec<&str> = encoded.split('.').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "1");
        assert_eq!(parts[1], STANDARD.encode([0xA5; SALT_SIZE]));

        let fallback = sample(EnvelopeVersion::FallbackV1).encode();
        assert!(fallback.starts_with("fallback.1."));
        assert_eq!(fallback.split('.').count(), 5);

        assert!(sample(EnvelopeVersion::FallbackV0).encode().starts_with("fallback.0."));
    }

    #[test]
    fn test_decode_each_version() {
        for version in [
            EnvelopeVersion::V1,
            EnvelopeVersion::FallbackV1,
            EnvelopeVersion::FallbackV0,
        ] {
            let envelope = sample(version);
            let decoded = decode(&envelope.encode()).unwrap();
            assert_eq!(decoded, envelope);
            assert_eq!(EnvelopeVersion::for_strength(decoded.strength()), version);
        }
    }

    #[test]
    fn test_kdf_params_pinned() {
        for version in [
            EnvelopeVersion::V1,
            EnvelopeVersion::FallbackV1,
            EnvelopeVersion::FallbackV0,
        ] {
            assert_eq!(version.kdf_params().iterations, 100_000);
        }
    }

    #[test]
    fn test_sniff() {
        assert_eq!(EnvelopeVersion::sniff("1.xx"), Some(EnvelopeVersion::V1));
        assert_eq!(
            EnvelopeVersion::sniff("fallback.0.!!"),
            Some(EnvelopeVersion::FallbackV0)
        );
        assert_eq!(EnvelopeVersion::sniff("12.a"), None);
        assert_eq!(EnvelopeVersion::sniff("fallback.2.a"), None);
    }

    #[test]
    fn test_unknown_version() {
        let body = sample(EnvelopeVersion::V1).encode();
        let rest = body.strip_prefix("1.").unwrap();

        assert_eq!(
            decode(&format!("2.{}", rest)),
            Err(FormatError::UnsupportedVersion("2".to_string()))
        );
        assert_eq!(
            decode(&format!("fallback.7.{}", rest)),
            Err(FormatError::UnsupportedVersion("fallback.7".to_string()))
        );
        // Unknown version wins over segment count
        assert!(matches!(
            decode("9.only"),
            Err(FormatError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_wrong_segment_count() {
        let encoded = sample(EnvelopeVersion::V1).encode();
        assert!(matches!(
            decode(&format!("{}.extra", encoded)),
            Err(FormatError::Malformed(_))
        ));

        let truncated: Vec<&str> = encoded.split('.').take(3).collect();
        assert!(matches!(
            decode(&truncated.join(".")),
            Err(FormatError::Malformed(_))
        ));

        assert!(matches!(decode("fallback"), Err(FormatError::Malformed(_))));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(decode(""), Err(FormatError::Malformed(_))));
        assert!(matches!(decode("garbage"), Err(FormatError::Malformed(_))));
        assert!(matches!(decode("1.!!!.AAAA.AAAA"), Err(FormatError::Malformed(_))));
        assert!(matches!(decode("1.é.a.b"), Err(FormatError::Malformed(_))));
        assert!(matches!(
            Envelope::from_bytes(&[0xFF, 0xFE]),
            Err(FormatError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_salt_length() {
        let short_salt = STANDARD.encode([0u8; 8]);
        let iv = STANDARD.encode([0u8; IV_SIZE]);
        let input = format!("1.{}.{}.AAAA", short_salt, iv);
        assert!(matches!(decode(&input), Err(FormatError::Malformed(_))));
    }

    #[test]
    fn test_empty_ciphertext_field() {
        let envelope = Envelope {
            version: EnvelopeVersion::FallbackV0,
            salt: [1; SALT_SIZE],
            iv: [2; IV_SIZE],
            ciphertext: Vec::new(),
        };
        assert_eq!(decode(&envelope.encode()).unwrap(), envelope);
    }
}
