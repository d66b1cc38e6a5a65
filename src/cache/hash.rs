//! Content and repository identity hashing.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size used while streaming file contents into the hasher.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Hex characters kept from the repository path digest.
pub const REPO_HASH_LEN: usize = 16;

/// Full SHA-256 hex digest of a file's bytes, read in fixed-size chunks.
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Stable namespace for a repository: truncated digest of its resolved path.
///
/// Falls back to the path as given when it cannot be canonicalized, so a
/// repository that has been deleted still maps to the namespace it had.
pub fn repository_hash(repo_path: &Path) -> String {
    let resolved = std::fs::canonicalize(repo_path).unwrap_or_else(|_| {
        std::path::absolute(repo_path).unwrap_or_else(|_| repo_path.to_path_buf())
    });

    let mut hasher = Sha256::new();
    hasher.update(resolved.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..REPO_HASH_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_hash_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, "abc").unwrap();

        assert_eq!(
            file_hash(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_hash_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let mut data = vec![7u8; HASH_CHUNK_SIZE * 2 + 17];
        fs::write(&path, &data).unwrap();
        let before = file_hash(&path).unwrap();

        // Flip a byte in the last, partial chunk
        let last = data.len() - 1;
        data[last] = 8;
        fs::write(&path, &data).unwrap();

        assert_ne!(before, file_hash(&path).unwrap());
    }

    #[test]
    fn test_repository_hash_is_stable_and_truncated() {
        let dir = TempDir::new().unwrap();
        let a = repository_hash(dir.path());
        let b = repository_hash(&dir.path().join("."));

        assert_eq!(a.len(), REPO_HASH_LEN);
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(file_hash(Path::new("/definitely/not/here.txt")).is_err());
    }
}
