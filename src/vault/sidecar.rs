//! Verification sidecar: a hash over the head of an encrypted blob,
//! checkable without the key

use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSidecar {
    /// Number of leading blob bytes covered by `hash`
    pub prefix_len: usize,
    /// Total blob length when the sidecar was written
    pub blob_len: u64,
    /// BLAKE3 hex digest of the covered prefix
    pub hash: String,
}

impl VerificationSidecar {
    pub fn for_blob(blob: &[u8], prefix_len: usize) -> Self {
        let covered = &blob[..prefix_len.min(blob.len())];
        VerificationSidecar {
            prefix_len: covered.len(),
            blob_len: blob.len() as u64,
            hash: blake3::hash(covered).to_hex().to_string(),
        }
    }

    /// Whether the covered prefix fits inside the recorded blob, as
    /// `for_blob` always writes it
    pub fn is_consistent(&self) -> bool {
        u64::try_from(self.prefix_len).is_ok_and(|len| len <= self.blob_len)
    }

    /// Check a blob prefix (read with `prefix_len`) and the blob's length
    pub fn matches(&self, prefix: &[u8], blob_len: u64) -> bool {
        blob_len == self.blob_len && blake3::hash(prefix).to_hex().as_str() == self.hash
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
