use std::fs::{self, File};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Computes BLAKE3 content fingerprints. Used purely as an equality oracle
/// for exact-duplicate detection, never compared by distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    /// Fingerprint of an in-memory buffer as 64 lowercase hex characters.
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    /// Streams the file through the hasher without loading it whole.
    pub fn hash_file(&self, file_path: &Path) -> Result<String, HashError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(File::open(file_path)?)?;
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Files of different length are never read.
    pub fn verify_identical_content(&self, file1: &Path, file2: &Path) -> Result<bool, HashError> {
        if fs::metadata(file1)?.len() != fs::metadata(file2)?.len() {
            return Ok(false);
        }
        Ok(self.hash_file(file1)? == self.hash_file(file2)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_format_and_consistency() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.jpg");
        fs::write(&file_path, b"Hello, World!").unwrap();

        let hasher = ContentHasher::new();
        let hash = hasher.hash_file(&file_path).unwrap();

        assert_eq!(hash, hasher.hash_file(&file_path).unwrap());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hasher.hash_bytes(b"Hello, World!"));
    }

    #[test]
    fn test_identical_and_different_content() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("file1.jpg");
        let file2 = temp_dir.path().join("file2.jpg");
        let file3 = temp_dir.path().join("file3.jpg");
        fs::write(&file1, b"Identical content").unwrap();
        fs::write(&file2, b"Identical content").unwrap();
        fs::write(&file3, b"Other content").unwrap();

        let hasher = ContentHasher::new();
        assert!(hasher.verify_identical_content(&file1, &file2).unwrap());
        assert!(!hasher.verify_identical_content(&file1, &file3).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let hasher = ContentHasher::new();
        let result = hasher.hash_file(Path::new("/non/existent/file.jpg"));
        assert!(matches!(result, Err(HashError::Io(_))));
    }
}
