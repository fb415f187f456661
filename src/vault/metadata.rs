//! File metadata stored encrypted inside each vault blob

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current metadata/blob layout version
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Metadata for one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Name the file had before it entered the vault
    pub original_name: String,
    /// MIME type guessed from the original name
    pub mime_type: String,
    /// When the file was first stored
    pub created_at: DateTime<Utc>,
    /// BLAKE3 hash of the plaintext content
    pub content_hash: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Blob layout version
    pub format_version: u32,
}

impl FileMetadata {
    /// Build metadata for `content`
    pub fn new(original_name: &str, content: &[u8]) -> Self {
        FileMetadata {
            original_name: original_name.to_string(),
            mime_type: guess_mime(original_name).to_string(),
            created_at: Utc::now(),
            content_hash: content_hash(content),
            size: content.len() as u64,
            format_version: FILE_FORMAT_VERSION,
        }
    }

    /// Compare `content` against the stored hash
    pub fn check_content(&self, content: &[u8]) -> IntegrityStatus {
        let actual = content_hash(content);
        if actual == self.content_hash {
            IntegrityStatus::Verified
        } else {
            IntegrityStatus::Mismatch {
                expected: self.content_hash.clone(),
                actual,
            }
        }
    }

    /// Original extension including the dot, or empty
    pub fn extension(&self) -> String {
        Path::new(&self.original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// Result of the post-decrypt content hash check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Verified,
    Mismatch { expected: String, actual: String },
}

impl IntegrityStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, IntegrityStatus::Verified)
    }
}

/// BLAKE3 hex digest
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// MIME type from a file name's extension
pub fn guess_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("photo.jpg"), "image/jpeg");
        assert_eq!(guess_mime("PHOTO.JPEG"), "image/jpeg");
        assert_eq!(guess_mime("scan.heic"), "image/heic");
        assert_eq!(guess_mime("noext"), "application/octet-stream");
    }

    #[test]
    fn test_check_content() {
        let metadata = FileMetadata::new("photo.jpg", b"pixels");
        assert_eq!(metadata.size, 6);
        assert!(metadata.check_content(b"pixels").is_verified());
        assert!(matches!(
            metadata.check_content(b"pixelz"),
            IntegrityStatus::Mismatch { .. }
        ));
    }

    #[test]
    fn test_extension() {
        assert_eq!(FileMetadata::new("a.JPG", b"").extension(), ".jpg");
        assert_eq!(FileMetadata::new("README", b"").extension(), "");
        assert_eq!(FileMetadata::new("x.j/g", b"").extension(), "");
    }
}
