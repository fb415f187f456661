//! Secure erasure of files and directories
//!
//! Each file is overwritten `passes` times before deletion:
//! pass 1 random bytes, middle passes alternating 0x55/0xAA, last pass
//! zeros. Files larger than `max_full_overwrite_bytes` only get their
//! leading and trailing `edge_window_bytes` overwritten; that limitation is
//! reported in the `WipeReport`, as is any fallback to a plain delete.
//!
//! Overwriting cannot defeat wear levelling or copy-on-write storage; it
//! removes the data from the logical file before the unlink.

use crate::config::EraseConfig;
use crate::error::{Error, Result};
use crate::storage::FileStore;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Extensions of auxiliary files that belong to a wiped file
pub const SIDECAR_EXTENSIONS: &[&str] = &["verify", "meta", "cache", "partial"];

/// Fill pattern for one overwrite pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Random,
    Fixed(u8),
}

/// Pattern for pass `index` (0-based) out of `passes`
pub fn pass_pattern(index: u32, passes: u32) -> Pattern {
    if index == 0 {
        Pattern::Random
    } else if index + 1 == passes {
        Pattern::Fixed(0x00)
    } else if index % 2 == 1 {
        Pattern::Fixed(0x55)
    } else {
        Pattern::Fixed(0xAA)
    }
}

/// A file that was deleted without a completed overwrite
#[derive(Debug, Clone)]
pub struct DegradedWipe {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a wipe
#[derive(Debug, Clone, Default)]
pub struct WipeReport {
    /// Files removed
    pub files_wiped: usize,
    /// Overwrite passes completed across all files
    pub overwrite_passes: usize,
    /// Files larger than the full-overwrite bound; only edges were overwritten
    pub partially_overwritten: Vec<PathBuf>,
    /// Files that fell back to a plain delete
    pub degraded: Vec<DegradedWipe>,
}

impl WipeReport {
    /// Whether every file got its full overwrite schedule
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty() && self.partially_overwritten.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: WipeReport) {
        self.files_wiped += other.files_wiped;
        self.overwrite_passes += other.overwrite_passes;
        self.partially_overwritten.extend(other.partially_overwritten);
        self.degraded.extend(other.degraded);
    }

    /// Turn a degraded wipe into `SecureDeleteDegraded`
    pub fn into_result(self) -> Result<WipeReport> {
        if let Some(first) = self.degraded.first() {
            return Err(Error::SecureDeleteDegraded {
                path: first.path.clone(),
                reason: first.reason.clone(),
            });
        }
        Ok(self)
    }
}

/// Multi-pass file and directory eraser
#[derive(Clone)]
pub struct SecureEraser {
    fs: Arc<dyn FileStore>,
    max_full_overwrite: u64,
    edge_window: u64,
    default_passes: u32,
}

impl SecureEraser {
    /// Create an eraser over `fs`
    pub fn new(fs: Arc<dyn FileStore>, config: &EraseConfig) -> Self {
        SecureEraser {
            fs,
            max_full_overwrite: config.max_full_overwrite_bytes,
            edge_window: config.edge_window_bytes.min(config.max_full_overwrite_bytes),
            default_passes: config.passes.max(1),
        }
    }

    /// Configured pass count
    pub fn default_passes(&self) -> u32 {
        self.default_passes
    }

    /// Overwrite and delete a file, then its sidecars
    pub fn wipe_file(&self, path: &Path, passes: u32) -> Result<WipeReport> {
        let mut report = self.wipe_single(path, passes)?;

        for sidecar in sidecars_of(path) {
            if self.fs.exists(&sidecar) && !self.fs.is_dir(&sidecar) {
                report.merge(self.wipe_single(&sidecar, passes)?);
            }
        }

        Ok(report)
    }

    /// Wipe every file below `path`, then remove the emptied directories
    pub fn wipe_directory(&self, path: &Path, passes: u32) -> Result<WipeReport> {
        let report = self.wipe_contents(path, passes)?;
        self.fs.remove_dir(path)?;
        debug!("Removed directory {:?}", path);
        Ok(report)
    }

    /// Like `wipe_directory`, but keeps `path` itself
    pub fn wipe_contents(&self, path: &Path, passes: u32) -> Result<WipeReport> {
        let mut report = WipeReport::default();

        for entry in self.fs.list(path)? {
            if self.fs.is_dir(&entry) {
                report.merge(self.wipe_directory(&entry, passes)?);
            } else if self.fs.exists(&entry) {
                // Sidecars wiped along with an earlier entry are already gone
                report.merge(self.wipe_file(&entry, passes)?);
            }
        }

        Ok(report)
    }

    fn wipe_single(&self, path: &Path, passes: u32) -> Result<WipeReport> {
        let passes = passes.max(1);
        let mut report = WipeReport::default();

        match self.overwrite(path, passes) {
            Ok(Overwrite::Full) => {
                report.overwrite_passes += passes as usize;
            }
            Ok(Overwrite::EdgesOnly) => {
                report.overwrite_passes += passes as usize;
                report.partially_overwritten.push(path.to_path_buf());
                warn!(
                    "Only the leading and trailing {} bytes of {:?} were overwritten",
                    self.edge_window, path
                );
            }
            Err(reason) => {
                warn!("Overwrite of {:?} failed, deleting without overwrite: {}", path, reason);
                report.degraded.push(DegradedWipe {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        }

        self.fs.remove_file(path)?;
        report.files_wiped += 1;
        debug!("Wiped {:?}", path);
        Ok(report)
    }

    fn overwrite(&self, path: &Path, passes: u32) -> std::result::Result<Overwrite, String> {
        let len = self.fs.len(path).map_err(|e| e.to_string())?;
        if len == 0 {
            return Ok(Overwrite::Full);
        }

        if len <= self.max_full_overwrite {
            for index in 0..passes {
                let buf = fill(pass_pattern(index, passes), len as usize);
                let written = if self.fs.supports_partial_writes() {
                    self.fs.write_at(path, 0, &buf)
                } else {
                    self.fs.write(path, &buf)
                };
                written.map_err(|e| format!("pass {}: {}", index + 1, e))?;
            }
            return Ok(Overwrite::Full);
        }

        if !self.fs.supports_partial_writes() {
            return Err(format!(
                "{} bytes exceeds full-overwrite bound and storage lacks offset writes",
                len
            ));
        }

        let window = self.edge_window.min(len);
        let tail_offset = len - window;
        for index in 0..passes {
            let buf = fill(pass_pattern(index, passes), window as usize);
            self.fs
                .write_at(path, 0, &buf)
                .and_then(|_| self.fs.write_at(path, tail_offset, &buf))
                .map_err(|e| format!("pass {}: {}", index + 1, e))?;
        }
        Ok(Overwrite::EdgesOnly)
    }
}

enum Overwrite {
    Full,
    EdgesOnly,
}

fn fill(pattern: Pattern, len: usize) -> Vec<u8> {
    match pattern {
        Pattern::Random => {
            let mut buf = vec![0u8; len];
            rand::thread_rng().fill_bytes(&mut buf);
            buf
        }
        Pattern::Fixed(byte) => vec![byte; len],
    }
}

/// Auxiliary files that share a base name with `path`: `<stem>.<ext>` and
/// `<file name>.<ext>` for each sidecar extension
pub fn sidecars_of(path: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str())) else {
        return Vec::new();
    };
    let stem = name.split('.').next().unwrap_or(name);

    let mut candidates = Vec::new();
    for ext in SIDECAR_EXTENSIONS {
        for base in [stem, name] {
            let candidate = dir.join(format!("{}.{}", base, ext));
            if candidate != path && !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }
    candidates
}
