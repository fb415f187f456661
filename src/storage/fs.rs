//! Byte-oriented filesystem access
//!
//! Every file operation of the vault and the eraser goes through
//! `FileStore`, so alternative backends (or a recording double in tests)
//! can be injected.

use crate::error::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Filesystem operations used by the vault and the eraser
pub trait FileStore: Send + Sync {
    /// Read a whole file
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Read at most `len` bytes from the start of a file
    fn read_prefix(&self, path: &Path, len: usize) -> Result<Vec<u8>> {
        let mut data = self.read(path)?;
        data.truncate(len);
        Ok(data)
    }

    /// Create or replace a file with `data`, flushed to storage
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Overwrite bytes in place at `offset` without truncating
    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()>;

    /// Whether `write_at` is implemented
    fn supports_partial_writes(&self) -> bool;

    /// File size in bytes
    fn len(&self, path: &Path) -> Result<u64>;

    /// Whether a file or directory exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Delete a file
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Rename a file, replacing the destination
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Direct children of a directory, sorted
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Create a directory and its parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove an empty directory
    fn remove_dir(&self, path: &Path) -> Result<()>;
}

/// `FileStore` over the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        LocalFileStore
    }
}

impl FileStore for LocalFileStore {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn read_prefix(&self, path: &Path, len: usize) -> Result<Vec<u8>> {
        let file = File::open(path)?;
        let mut data = Vec::new();
        file.take(len as u64).read_to_end(&mut data)?;
        Ok(data)
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    fn supports_partial_writes(&self) -> bool {
        true
    }

    fn len(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(fs::rename(from, to)?)
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path)?)
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_at_keeps_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.bin");
        let store = LocalFileStore::new();

        store.write(&path, b"abcdefgh").unwrap();
        store.write_at(&path, 6, b"XY").unwrap();
        store.write_at(&path, 0, b"ZZ").unwrap();

        assert_eq!(store.read(&path).unwrap(), b"ZZcdefXY");
        assert_eq!(store.len(&path).unwrap(), 8);
    }

    #[test]
    fn test_read_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.bin");
        let store = LocalFileStore::new();

        store.write(&path, b"0123456789").unwrap();
        assert_eq!(store.read_prefix(&path, 4).unwrap(), b"0123");
        assert_eq!(store.read_prefix(&path, 100).unwrap(), b"0123456789");
    }

    #[test]
    fn test_list_sorted() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new();
        store.write(&dir.path().join("b"), b"").unwrap();
        store.write(&dir.path().join("a"), b"").unwrap();
        store.create_dir_all(&dir.path().join("c/d")).unwrap();

        let names: Vec<_> = store
            .list(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
