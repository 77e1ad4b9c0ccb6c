// Content hashing using BLAKE3

use std::fs::File;
use std::io::Read;
use std::path::Path;
use crate::constants::{HASH_ALGORITHM, HASH_CHUNK_SIZE};
use crate::error::{MediaflowError, Result};

/// Stream a file through BLAKE3 in fixed-size chunks.
/// Memory use is bounded by HASH_CHUNK_SIZE regardless of file size.
/// Format: "blake3:<hex>"
pub fn compute_content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| MediaflowError::Hash(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)
            .map_err(|e| MediaflowError::Hash(format!("Failed to read {}: {}", path.display(), e)))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{}:{}", HASH_ALGORITHM, hasher.finalize().to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn compute_bytes_hash(data: &[u8]) -> String {
        format!("{}:{}", HASH_ALGORITHM, blake3::hash(data).to_hex())
    }

    #[test]
    fn test_hash_is_stable() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();

        let first = compute_content_hash(file.path()).unwrap();
        let second = compute_content_hash(file.path()).unwrap();
        assert!(first.starts_with("blake3:"));
        assert_eq!(first, second);
        assert_eq!(first, compute_bytes_hash(b"Hello, World!"));
    }

    #[test]
    fn test_hash_spans_multiple_chunks() {
        // Content larger than one read buffer must hash identically to the in-memory digest
        let data: Vec<u8> = (0..(HASH_CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();

        assert_eq!(compute_content_hash(file.path()).unwrap(), compute_bytes_hash(&data));
    }

    #[test]
    fn test_different_content_differs() {
        let mut a = NamedTempFile::new().unwrap();
        a.write_all(b"one").unwrap();
        let mut b = NamedTempFile::new().unwrap();
        b.write_all(b"two").unwrap();

        assert_ne!(
            compute_content_hash(a.path()).unwrap(),
            compute_content_hash(b.path()).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_hash_error() {
        let err = compute_content_hash(Path::new("/definitely/not/here.bin")).unwrap_err();
        assert!(matches!(err, MediaflowError::Hash(_)));
    }
}
