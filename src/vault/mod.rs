//! Encrypted file vault
//!
//! Each stored file becomes one blob on disk:
//!
//! ```text
//! <metadata envelope>::<content envelope>
//! ```
//!
//! named `<hash of blob sample>-<random>.enc`, plus a `<id>.verify`
//! sidecar hashing the head of the blob so corruption can be detected
//! without the key. Blobs are written to `.partial` and renamed into place.
//!
//! The vault does no locking: callers serialize operations on the same
//! record.

mod metadata;
mod sidecar;

pub use metadata::{
    content_hash, guess_mime, FileMetadata, IntegrityStatus, FILE_FORMAT_VERSION,
};
pub use sidecar::VerificationSidecar;

use crate::config::{Config, VaultConfig};
use crate::crypto::{
    environment_fingerprint, CipherService, EncryptionStrength, Envelope, EnvelopeVersion,
    KeyStore, ProviderSet,
};
use crate::erase::{SecureEraser, WipeReport};
use crate::error::{Error, FormatError, Result};
use crate::storage::{FileStore, LocalFileStore, SecureStorage};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Separates the metadata and content envelopes; never produced by the
/// envelope encoding
pub const BLOB_SEPARATOR: &str = "::";

/// Extension of encrypted blobs
pub const BLOB_EXTENSION: &str = "enc";

/// Extension of verification sidecars
pub const SIDECAR_EXTENSION: &str = "verify";

/// Suffix of blobs still being written
const PARTIAL_SUFFIX: &str = ".partial";

/// Bytes read from each blob by `list`; covers the metadata envelope of any
/// ordinary file name
const LIST_HEADER_WINDOW: usize = 4096;

/// Handle to one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFileRecord {
    /// On-disk identifier (file stem of the blob)
    pub id: String,
    /// Encrypted blob
    pub blob_path: PathBuf,
    /// Verification sidecar
    pub sidecar_path: PathBuf,
    /// Strength of the content envelope
    pub strength: EncryptionStrength,
}

/// A decrypted file materialized in the temp directory
#[derive(Debug, Clone)]
pub struct Retrieved {
    /// Plaintext temp file; the caller deletes it when done
    pub path: PathBuf,
    pub metadata: FileMetadata,
    /// Content hash check against the metadata
    pub integrity: IntegrityStatus,
}

impl Retrieved {
    /// Turn an integrity mismatch into `IntegrityMismatch`
    pub fn into_result(self) -> Result<Retrieved> {
        match &self.integrity {
            IntegrityStatus::Verified => Ok(self),
            IntegrityStatus::Mismatch { expected, actual } => Err(Error::IntegrityMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            }),
        }
    }
}

/// Leftovers cleaned up by `initialize`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unfinished blobs deleted
    pub removed_partials: usize,
    /// Sidecars without a blob deleted
    pub removed_orphan_sidecars: usize,
    /// Blobs whose missing sidecar was rewritten
    pub rebuilt_sidecars: usize,
}

/// Encrypted file storage
pub struct FileVault {
    config: VaultConfig,
    cipher: Arc<CipherService>,
    fs: Arc<dyn FileStore>,
    eraser: SecureEraser,
    initialized: AtomicBool,
}

impl FileVault {
    /// Create a vault over explicit collaborators
    pub fn new(config: &Config, cipher: Arc<CipherService>, fs: Arc<dyn FileStore>) -> Self {
        let eraser = SecureEraser::new(fs.clone(), &config.erase);
        FileVault {
            config: config.vault.clone(),
            cipher,
            fs,
            eraser,
            initialized: AtomicBool::new(false),
        }
    }

    /// Create a vault on the local filesystem with the detected crypto
    /// providers and a key store over `storage`
    pub fn open(config: &Config, storage: Arc<dyn SecureStorage>) -> Self {
        let keys = Arc::new(KeyStore::new(
            storage,
            environment_fingerprint(&config.encryption.app_id),
        ));
        let cipher = Arc::new(CipherService::new(keys, ProviderSet::detect(), &config.encryption));
        Self::new(config, cipher, Arc::new(LocalFileStore::new()))
    }

    /// The cipher service used for envelopes
    pub fn cipher(&self) -> &Arc<CipherService> {
        &self.cipher
    }

    /// The eraser used for removals
    pub fn eraser(&self) -> &SecureEraser {
        &self.eraser
    }

    /// Create directories and clean up after interrupted stores.
    ///
    /// Must be called once before any other operation; calling it again is
    /// harmless.
    pub fn initialize(&self) -> Result<RecoveryReport> {
        self.fs.create_dir_all(&self.config.vault_dir)?;
        self.fs.create_dir_all(&self.config.temp_dir)?;

        let mut recovery = RecoveryReport::default();
        for path in self.fs.list(&self.config.vault_dir)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(PARTIAL_SUFFIX) {
                // Never finalized, safe to delete without overwrite
                self.fs.remove_file(&path)?;
                recovery.removed_partials += 1;
                continue;
            }

            match path.extension().and_then(|e| e.to_str()) {
                Some(SIDECAR_EXTENSION) => {
                    if !self.fs.exists(&path.with_extension(BLOB_EXTENSION)) {
                        self.fs.remove_file(&path)?;
                        recovery.removed_orphan_sidecars += 1;
                    }
                }
                Some(BLOB_EXTENSION) => {
                    let sidecar_path = path.with_extension(SIDECAR_EXTENSION);
                    if !self.fs.exists(&sidecar_path) {
                        let blob = self.fs.read(&path)?;
                        self.write_sidecar(&sidecar_path, &blob)?;
                        recovery.rebuilt_sidecars += 1;
                    }
                }
                _ => {}
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "Vault initialized at {:?} (recovery: {:?})",
            self.config.vault_dir, recovery
        );
        Ok(recovery)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Encrypt the file at `source` into the vault
    pub fn store(&self, source: &Path, original_name: &str) -> Result<EncryptedFileRecord> {
        self.ensure_initialized()?;
        let content = Zeroizing::new(self.fs.read(source)?);
        self.store_bytes(&content, original_name)
    }

    /// Encrypt in-memory content into the vault
    pub fn store_bytes(
        &self,
        content: &[u8],
        original_name: &str,
    ) -> Result<EncryptedFileRecord> {
        self.ensure_initialized()?;
        let metadata = FileMetadata::new(original_name, content);
        self.store_with_metadata(content, &metadata)
    }

    fn store_with_metadata(
        &self,
        content: &[u8],
        metadata: &FileMetadata,
    ) -> Result<EncryptedFileRecord> {
        let metadata_json = Zeroizing::new(serde_json::to_vec(metadata)?);
        let metadata_envelope = self.cipher.encrypt(&metadata_json)?;
        let content_envelope = self.cipher.encrypt(content)?;
        let strength = content_envelope.strength();

        let blob = format!(
            "{}{}{}",
            metadata_envelope.encode(),
            BLOB_SEPARATOR,
            content_envelope.encode()
        )
        .into_bytes();

        let id = blob_id(&blob, self.config.name_sample_bytes);
        let record = self.record_for(&id, strength);
        let partial_path = partial_path(&record.blob_path);

        if let Err(e) = self.fs.write(&partial_path, &blob) {
            let _ = self.fs.remove_file(&partial_path);
            return Err(e);
        }
        self.fs.rename(&partial_path, &record.blob_path)?;
        if let Err(e) = self.write_sidecar(&record.sidecar_path, &blob) {
            let _ = self.fs.remove_file(&record.sidecar_path);
            let _ = self.fs.remove_file(&record.blob_path);
            return Err(e);
        }

        info!(
            "Stored {} ({} bytes plaintext, {} bytes on disk, {})",
            id,
            content.len(),
            blob.len(),
            strength
        );
        Ok(record)
    }

    fn write_sidecar(&self, path: &Path, blob: &[u8]) -> Result<()> {
        let sidecar = VerificationSidecar::for_blob(blob, self.config.verify_prefix_bytes);
        self.fs.write(path, &sidecar.to_bytes()?)
    }

    fn record_for(&self, id: &str, strength: EncryptionStrength) -> EncryptedFileRecord {
        EncryptedFileRecord {
            id: id.to_string(),
            blob_path: self
                .config
                .vault_dir
                .join(format!("{}.{}", id, BLOB_EXTENSION)),
            sidecar_path: self
                .config
                .vault_dir
                .join(format!("{}.{}", id, SIDECAR_EXTENSION)),
            strength,
        }
    }

    fn read_envelopes(&self, record: &EncryptedFileRecord) -> Result<(Envelope, Envelope)> {
        if !self.fs.exists(&record.blob_path) {
            return Err(Error::RecordNotFound(record.id.clone()));
        }
        let blob = self.fs.read(&record.blob_path)?;
        split_blob(&blob)
    }

    fn decrypt_metadata(&self, envelope: &Envelope) -> Result<FileMetadata> {
        let json = Zeroizing::new(self.cipher.decrypt(envelope)?);
        Ok(serde_json::from_slice(&json)?)
    }

    /// Decrypt only the metadata of a record
    pub fn read_metadata(&self, record: &EncryptedFileRecord) -> Result<FileMetadata> {
        self.ensure_initialized()?;
        let (metadata_envelope, _) = self.read_envelopes(record)?;
        self.decrypt_metadata(&metadata_envelope)
    }

    /// Decrypt a record into a temp file.
    ///
    /// A content hash mismatch is reported in `Retrieved::integrity`, not as
    /// an error.
    pub fn retrieve(&self, record: &EncryptedFileRecord) -> Result<Retrieved> {
        self.ensure_initialized()?;
        let (metadata_envelope, content_envelope) = self.read_envelopes(record)?;

        let metadata = self.decrypt_metadata(&metadata_envelope)?;
        let content = Zeroizing::new(self.cipher.decrypt(&content_envelope)?);

        let integrity = metadata.check_content(&content);
        if let IntegrityStatus::Mismatch { expected, actual } = &integrity {
            warn!(
                "Content hash mismatch for {}: expected {}, got {}",
                record.id, expected, actual
            );
        }

        let path = self.config.temp_dir.join(format!(
            "{}-{}{}",
            record.id,
            uuid::Uuid::new_v4().simple(),
            metadata.extension()
        ));
        self.fs.write(&path, &content)?;
        debug!("Retrieved {} to {:?}", record.id, path);

        Ok(Retrieved {
            path,
            metadata,
            integrity,
        })
    }

    fn temp_files_for(&self, record: &EncryptedFileRecord) -> Result<Vec<PathBuf>> {
        if !self.fs.exists(&self.config.temp_dir) {
            return Ok(Vec::new());
        }
        let prefix = format!("{}-", record.id);
        Ok(self
            .fs
            .list(&self.config.temp_dir)?
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect())
    }

    /// Securely erase a record, its sidecar and its temp plaintext files
    pub fn remove(&self, record: &EncryptedFileRecord) -> Result<WipeReport> {
        self.ensure_initialized()?;
        let passes = self.eraser.default_passes();
        let mut report = WipeReport::default();

        if self.fs.exists(&record.blob_path) {
            report.merge(self.eraser.wipe_file(&record.blob_path, passes)?);
        }
        if self.fs.exists(&record.sidecar_path) {
            report.merge(self.eraser.wipe_file(&record.sidecar_path, passes)?);
        }
        for temp in self.temp_files_for(record)? {
            report.merge(self.eraser.wipe_file(&temp, passes)?);
        }

        info!("Removed {} ({} files wiped)", record.id, report.files_wiped);
        Ok(report)
    }

    /// Check the blob against its sidecar without decrypting.
    ///
    /// The sidecar hashes the blob length and its first
    /// `verify_prefix_bytes`; a same-length change past that prefix is only
    /// caught by decryption (`AuthFailed` on retrieve).
    pub fn verify(&self, record: &EncryptedFileRecord) -> Result<bool> {
        self.ensure_initialized()?;
        if !self.fs.exists(&record.blob_path) {
            return Err(Error::RecordNotFound(record.id.clone()));
        }
        if !self.fs.exists(&record.sidecar_path) {
            warn!("Missing verification sidecar for {}", record.id);
            return Ok(false);
        }

        let raw = self.fs.read(&record.sidecar_path)?;
        let sidecar = match VerificationSidecar::from_bytes(&raw) {
            Ok(sidecar) => sidecar,
            Err(e) => {
                warn!("Unreadable verification sidecar for {}: {}", record.id, e);
                return Ok(false);
            }
        };

        let blob_len = self.fs.len(&record.blob_path)?;
        if sidecar.blob_len != blob_len || !sidecar.is_consistent() {
            warn!("Verification failed for {}: sidecar does not fit blob", record.id);
            return Ok(false);
        }
        let prefix = self.fs.read_prefix(&record.blob_path, sidecar.prefix_len)?;
        let ok = sidecar.matches(&prefix, blob_len);
        if !ok {
            warn!("Verification failed for {}", record.id);
        }
        Ok(ok)
    }

    /// Whether a record was written below the strength now available
    pub fn needs_reencrypt(&self, record: &EncryptedFileRecord) -> Result<bool> {
        self.ensure_initialized()?;
        let (_, content_envelope) = self.read_envelopes(record)?;
        Ok(self.cipher.needs_upgrade(&content_envelope))
    }

    /// Re-encrypt a record with fresh envelopes, then erase the original.
    ///
    /// Plaintext stays in memory. Content that fails its hash check is not
    /// migrated. Once the new record is written it is kept: if erasing the
    /// original fails part way, whatever is left of it is deleted without
    /// overwrite and the failure is logged.
    pub fn reencrypt(&self, record: &EncryptedFileRecord) -> Result<EncryptedFileRecord> {
        self.ensure_initialized()?;
        let (metadata_envelope, content_envelope) = self.read_envelopes(record)?;

        let metadata = self.decrypt_metadata(&metadata_envelope)?;
        let content = Zeroizing::new(self.cipher.decrypt(&content_envelope)?);
        if let IntegrityStatus::Mismatch { expected, actual } = metadata.check_content(&content) {
            return Err(Error::IntegrityMismatch { expected, actual });
        }

        let upgraded = FileMetadata {
            format_version: FILE_FORMAT_VERSION,
            ..metadata
        };
        let new_record = self.store_with_metadata(&content, &upgraded)?;

        if let Err(e) = self.remove(record) {
            warn!(
                "Erase of {} after re-encryption failed, deleting leftovers: {}",
                record.id, e
            );
            for leftover in [&record.blob_path, &record.sidecar_path] {
                if self.fs.exists(leftover) {
                    if let Err(e) = self.fs.remove_file(leftover) {
                        warn!("Could not delete {:?}: {}", leftover, e);
                    }
                }
            }
        }

        info!(
            "Re-encrypted {} -> {} ({} -> {})",
            record.id, new_record.id, record.strength, new_record.strength
        );
        Ok(new_record)
    }

    /// Records currently in the vault
    pub fn list(&self) -> Result<Vec<EncryptedFileRecord>> {
        self.ensure_initialized()?;
        let mut records = Vec::new();

        for path in self.fs.list(&self.config.vault_dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            // Corrupt blobs are still listed so `scan` can report them
            match self.content_version(&path)? {
                Some(version) => records.push(self.record_for(id, version.strength())),
                None => warn!("Skipping blob with unrecognized layout {:?}", path),
            }
        }

        Ok(records)
    }

    /// Version of the content envelope, read from the blob header
    fn content_version(&self, path: &Path) -> Result<Option<EnvelopeVersion>> {
        let head = self.fs.read_prefix(path, LIST_HEADER_WINDOW)?;
        if let Some(version) = sniff_content(&head) {
            return Ok(Some(version));
        }
        if head.len() < LIST_HEADER_WINDOW {
            return Ok(None);
        }
        // Metadata envelope longer than the window
        Ok(sniff_content(&self.fs.read(path)?))
    }

    /// Verify every record; returns those that fail
    pub fn scan(&self) -> Result<Vec<EncryptedFileRecord>> {
        let mut corrupt = Vec::new();
        for record in self.list()? {
            if !self.verify(&record)? {
                corrupt.push(record);
            }
        }
        info!("Scan complete: {} corrupt records", corrupt.len());
        Ok(corrupt)
    }

    /// Securely erase every decrypted temp file
    pub fn cleanup_temp_files(&self) -> Result<WipeReport> {
        self.ensure_initialized()?;
        let report = self
            .eraser
            .wipe_contents(&self.config.temp_dir, self.eraser.default_passes())?;
        debug!("Cleaned up {} temp files", report.files_wiped);
        Ok(report)
    }

    /// Erase all vault data and the master key
    pub fn wipe_all(&self) -> Result<WipeReport> {
        self.ensure_initialized()?;
        let passes = self.eraser.default_passes();

        let mut report = self.eraser.wipe_contents(&self.config.vault_dir, passes)?;
        report.merge(self.eraser.wipe_contents(&self.config.temp_dir, passes)?);
        self.cipher.key_store().wipe_master_key()?;

        warn!("Vault wiped ({} files)", report.files_wiped);
        Ok(report)
    }
}

/// `<hex of blob sample hash>-<random hex>`
fn blob_id(blob: &[u8], sample_len: usize) -> String {
    let sample = &blob[..sample_len.min(blob.len())];
    let digest = blake3::hash(sample).to_hex();

    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);

    format!("{}-{}", &digest.as_str()[..16], hex::encode(suffix))
}

fn sniff_content(blob: &[u8]) -> Option<EnvelopeVersion> {
    let text = String::from_utf8_lossy(blob);
    let (_, content) = text.split_once(BLOB_SEPARATOR)?;
    EnvelopeVersion::sniff(content)
}

fn partial_path(blob_path: &Path) -> PathBuf {
    let mut name = blob_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Split a blob into its metadata and content envelopes
pub fn split_blob(blob: &[u8]) -> Result<(Envelope, Envelope)> {
    let text = std::str::from_utf8(blob)
        .map_err(|_| FormatError::Malformed("blob is not ASCII".to_string()))?;
    let (metadata, content) = text
        .split_once(BLOB_SEPARATOR)
        .ok_or_else(|| FormatError::Malformed("blob separator missing".to_string()))?;
    Ok((Envelope::decode(metadata)?, Envelope::decode(content)?))
}
