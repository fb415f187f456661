//! Configuration management for restvault

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of overwrite passes for secure erase
pub const DEFAULT_WIPE_PASSES: u32 = 3;

/// Files up to this size are overwritten completely: 10MB
pub const DEFAULT_MAX_FULL_OVERWRITE: u64 = 10 * 1024 * 1024;

/// Leading/trailing window overwritten on larger files: 1MB
pub const DEFAULT_EDGE_WINDOW: u64 = 1024 * 1024;

/// Bytes of the encrypted blob covered by the verification sidecar
pub const DEFAULT_VERIFY_PREFIX: usize = 1024;

/// Bytes of the encrypted blob hashed into the on-disk file name
pub const DEFAULT_NAME_SAMPLE: usize = 1024;

/// What to do with envelopes produced by the legacy XOR path
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LegacyPolicy {
    /// Decrypt, with a warning
    Accept,
    /// Refuse to decrypt
    Reject,
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Use the hash-keystream provider when AEAD is unavailable
    pub allow_degraded_encrypt: bool,

    /// Legacy XOR envelopes
    pub legacy_policy: LegacyPolicy,

    /// Application id mixed into the key binding fingerprint
    pub app_id: String,
}

/// Secure erase configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraseConfig {
    /// Overwrite passes per file
    pub passes: u32,

    /// Files up to this size get a full overwrite
    pub max_full_overwrite_bytes: u64,

    /// Window size overwritten at each end of larger files
    pub edge_window_bytes: u64,
}

/// File vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Encrypted blobs and their sidecars
    pub vault_dir: PathBuf,

    /// Decrypted temporary files
    pub temp_dir: PathBuf,

    /// Key material for the file-backed secure storage
    pub key_dir: PathBuf,

    /// Prefix length covered by the verification sidecar
    pub verify_prefix_bytes: usize,

    /// Sample length hashed into the blob file name
    pub name_sample_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Encryption configuration
    pub encryption: EncryptionConfig,

    /// Secure erase configuration
    pub erase: EraseConfig,

    /// File vault configuration
    pub vault: VaultConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to the data directory
    pub data_dir: PathBuf,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            allow_degraded_encrypt: true,
            legacy_policy: LegacyPolicy::Accept,
            app_id: "restvault".to_string(),
        }
    }
}

impl Default for EraseConfig {
    fn default() -> Self {
        EraseConfig {
            passes: DEFAULT_WIPE_PASSES,
            max_full_overwrite_bytes: DEFAULT_MAX_FULL_OVERWRITE,
            edge_window_bytes: DEFAULT_EDGE_WINDOW,
        }
    }
}

impl VaultConfig {
    fn rooted_at(data_dir: &Path) -> Self {
        VaultConfig {
            vault_dir: data_dir.join("vault"),
            temp_dir: data_dir.join("tmp"),
            key_dir: data_dir.join("keys"),
            verify_prefix_bytes: DEFAULT_VERIFY_PREFIX,
            name_sample_bytes: DEFAULT_NAME_SAMPLE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("restvault");

        Config::with_root(data_dir)
    }
}

impl Config {
    /// Default configuration with every directory under `data_dir`
    pub fn with_root(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Config {
            encryption: EncryptionConfig::default(),
            erase: EraseConfig::default(),
            vault: VaultConfig::rooted_at(&data_dir),
            logging: LoggingConfig::default(),
            data_dir,
        }
    }

    /// Load configuration from a file (YAML or JSON, chosen by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.erase.passes == 0 {
            return Err(Error::InvalidConfig(
                "Erase passes must be greater than 0".to_string(),
            ));
        }

        if self.erase.edge_window_bytes == 0
            || self.erase.edge_window_bytes > self.erase.max_full_overwrite_bytes
        {
            return Err(Error::InvalidConfig(
                "edge_window_bytes must be in 1..=max_full_overwrite_bytes".to_string(),
            ));
        }

        if self.vault.verify_prefix_bytes == 0 {
            return Err(Error::InvalidConfig(
                "verify_prefix_bytes must be greater than 0".to_string(),
            ));
        }

        if self.vault.name_sample_bytes == 0 {
            return Err(Error::InvalidConfig(
                "name_sample_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.vault.vault_dir)?;
        std::fs::create_dir_all(&self.vault.temp_dir)?;
        std::fs::create_dir_all(&self.vault.key_dir)?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = Config::with_root("/tmp/restvault-test");
        assert!(config.validate().is_ok());
        assert_eq!(config.vault.vault_dir, PathBuf::from("/tmp/restvault-test/vault"));
    }

    #[test]
    fn test_validate_rejects_zero_passes() {
        let mut config = Config::with_root("/tmp/x");
        config.erase.passes = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_ignores_removed_kdf_setting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        Config::with_root(dir.path()).save(&path).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["encryption"]["kdf_iterations"] = serde_json::json!(2_000);
        std::fs::write(&path, value.to_string()).unwrap();

        assert!(Config::load(&path).is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_window() {
        let mut config = Config::with_root("/tmp/x");
        config.erase.edge_window_bytes = config.erase.max_full_overwrite_bytes + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_root(dir.path());
        config.encryption.legacy_policy = LegacyPolicy::Reject;
        config.erase.passes = 7;

        for name in ["config.json", "config.yaml"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = Config::load(&path).unwrap();
            assert_eq!(loaded.erase.passes, 7);
            assert_eq!(loaded.encryption.legacy_policy, LegacyPolicy::Reject);
            assert_eq!(loaded.vault.temp_dir, config.vault.temp_dir);
        }
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path().join("data"));
        config.ensure_directories().unwrap();
        assert!(config.vault.vault_dir.is_dir());
        assert!(config.vault.temp_dir.is_dir());
        assert!(config.vault.key_dir.is_dir());
    }
}
