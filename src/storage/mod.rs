//! Storage collaborators
//!
//! The secure-storage facility that holds the master key, and the
//! byte-oriented filesystem used for encrypted blobs.

mod fs;
mod secure;

pub use fs::{FileStore, LocalFileStore};
pub use secure::{FileSecureStorage, KeychainStorage, MemorySecureStorage, SecureStorage};
