//! Secure storage backends for key material
//!
//! - `KeychainStorage`: platform keychain through the `keyring` crate
//!   (macOS Keychain, Secret Service, Windows Credential Manager)
//! - `FileSecureStorage`: owner-only files under a key directory, for
//!   environments without a keychain
//! - `MemorySecureStorage`: process-local, for tests and ephemeral sessions

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use zeroize::Zeroizing;

/// Key/value secret storage owned by the platform
pub trait SecureStorage: Send + Sync {
    /// Store a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch a value, `None` if absent
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Delete a value; deleting an absent key succeeds
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether stored values are protected by hardware or the OS keychain.
    /// Non-hardware backends get a key binding stored next to the key.
    fn is_hardware_backed(&self) -> bool;
}

/// Platform keychain storage
pub struct KeychainStorage {
    service: String,
}

impl KeychainStorage {
    /// Create storage under the given keychain service name
    pub fn new(service: impl Into<String>) -> Self {
        KeychainStorage {
            service: service.into(),
        }
    }

    /// Check if the platform keychain can be reached
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__restvault_probe__").is_ok()
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(|e| {
            Error::KeyStoreUnavailable(format!("keychain entry creation: {}", e))
        })
    }
}

impl SecureStorage for KeychainStorage {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?.set_secret(value).map_err(|e| {
            Error::KeyStoreUnavailable(format!("keychain store for '{}': {}", key, e))
        })?;

        // A backend without persistence accepts the write and then has
        // nothing on read; a key stored there would be lost.
        let persisted = self.get(key)?;
        if persisted.as_deref().map(Vec::as_slice) != Some(value) {
            return Err(Error::KeyStoreUnavailable(format!("keychain did not persist '{}'", key)));
        }

        debug!("Stored secret '{}' in platform keychain", key);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.entry(key)?.get_secret() {
            Ok(secret) => Ok(Some(Zeroizing::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::KeyStoreUnavailable(format!("keychain get for '{}': {}", key, e))),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {
                debug!("Deleted secret '{}' from platform keychain", key);
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::KeyStoreUnavailable(format!(
                "keychain delete for '{}': {}",
                key, e
            ))),
        }
    }

    fn is_hardware_backed(&self) -> bool {
        true
    }
}

/// File-backed secret storage, one owner-only file per key
pub struct FileSecureStorage {
    dir: PathBuf,
}

impl FileSecureStorage {
    /// Create storage rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSecureStorage { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::KeyStoreUnavailable(format!(
                "invalid secure storage key '{}'",
                key
            )));
        }
        Ok(self.dir.join(key))
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> Error {
    Error::KeyStoreUnavailable(format!("{}: {}", path.display(), e))
}

impl SecureStorage for FileSecureStorage {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| unavailable(&self.dir, e))?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path).map_err(|e| unavailable(&path, e))?;
        file.write_all(value).map_err(|e| unavailable(&path, e))?;
        file.sync_all().map_err(|e| unavailable(&path, e))?;
        debug!("Stored secret '{}' in {:?}", key, self.dir);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(&path, e)),
        }
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }
}

/// In-memory secret storage
#[derive(Default)]
pub struct MemorySecureStorage {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
    hardware_backed: bool,
    unavailable: AtomicBool,
}

impl MemorySecureStorage {
    /// Storage that reports itself as not hardware-backed
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that reports itself as hardware-backed
    pub fn hardware_backed() -> Self {
        MemorySecureStorage {
            hardware_backed: true,
            ..Self::default()
        }
    }

    /// Make every call fail with `KeyStoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::KeyStoreUnavailable(
                "memory storage disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl SecureStorage for MemorySecureStorage {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check()?;
        self.entries
            .lock()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    fn is_hardware_backed(&self) -> bool {
        self.hardware_backed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileSecureStorage::new(dir.path().join("keys"));

        assert!(storage.get("master").unwrap().is_none());
        storage.set("master", b"secret bytes").unwrap();
        assert_eq!(storage.get("master").unwrap().unwrap().as_slice(), b"secret bytes");

        storage.delete("master").unwrap();
        assert!(storage.get("master").unwrap().is_none());
        // Deleting again is fine
        storage.delete("master").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let storage = FileSecureStorage::new(dir.path());
        storage.set("master", b"k").unwrap();

        let mode = fs::metadata(dir.path().join("master")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FileSecureStorage::new(dir.path());
        assert!(storage.set("../escape", b"x").is_err());
        assert!(storage.set("", b"x").is_err());
    }

    #[test]
    fn test_keychain_persists_or_reports_unavailable() {
        let storage = KeychainStorage::new("restvault-test");
        let key = format!("roundtrip-{}", uuid::Uuid::new_v4().simple());

        match storage.set(&key, b"secret") {
            Ok(()) => {
                let stored = storage.get(&key).unwrap().unwrap();
                assert_eq!(stored.as_slice(), b"secret");

                let fresh = KeychainStorage::new("restvault-test");
                assert_eq!(fresh.get(&key).unwrap().unwrap().as_slice(), b"secret");

                storage.delete(&key).unwrap();
                assert!(storage.get(&key).unwrap().is_none());
            }
            Err(e) => assert!(matches!(e, Error::KeyStoreUnavailable(_))),
        }
    }

    #[test]
    fn test_memory_storage_unavailable() {
        let storage = MemorySecureStorage::new();
        storage.set("a", b"1").unwrap();

        storage.set_unavailable(true);
        assert!(matches!(storage.get("a"), Err(Error::KeyStoreUnavailable(_))));

        storage.set_unavailable(false);
        assert_eq!(storage.get("a").unwrap().unwrap().as_slice(), b"1");
    }
}
