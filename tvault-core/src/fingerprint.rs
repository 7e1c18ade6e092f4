//! Linear SHA-256 fingerprinting of local files.
//!
//! This is a plain whole-file digest, not a Merkle root: it only answers
//! "does the server already have these exact bytes" and verifies transfers.
//! Input is consumed in fixed-size blocks so memory stays constant for files
//! of any size.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::object::FileFingerprint;

/// Default read block size (1 MiB)
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Computes [`FileFingerprint`]s with a fixed read buffer
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    buffer_size: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(HASH_BUFFER_SIZE)
    }
}

impl Fingerprinter {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Fingerprint a local file.
    ///
    /// Fails with [`VaultError::NotFound`] if the path does not exist.
    pub fn fingerprint_file(&self, path: &Path) -> Result<FileFingerprint> {
        let file = open_existing(path)?;
        self.fingerprint_reader(file)
    }

    /// Fingerprint any byte source until EOF.
    pub fn fingerprint_reader<R: Read>(&self, mut reader: R) -> Result<FileFingerprint> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.buffer_size];
        let mut size = 0u64;

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(FileFingerprint::new(hex::encode(hasher.finalize()), size))
    }
}

/// Digest of an in-memory buffer
pub fn fingerprint_bytes(data: &[u8]) -> FileFingerprint {
    FileFingerprint::new(hex::encode(Sha256::digest(data)), data.len() as u64)
}

/// Open a local file, mapping a missing path to [`VaultError::NotFound`]
pub(crate) fn open_existing(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(VaultError::NotFound(path.to_path_buf()));
    }
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => VaultError::NotFound(path.to_path_buf()),
        _ => VaultError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_empty_input() {
        let fp = Fingerprinter::default()
            .fingerprint_reader(Cursor::new(Vec::new()))
            .unwrap();
        assert_eq!(fp.digest, EMPTY_SHA256);
        assert_eq!(fp.size, 0);
    }

    #[test]
    fn test_known_digest() {
        let fp = fingerprint_bytes(b"abc");
        assert_eq!(
            fp.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(fp.size, 3);
    }

    #[test]
    fn test_block_size_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let small = Fingerprinter::new(7).fingerprint_reader(Cursor::new(&data)).unwrap();
        let large = Fingerprinter::default()
            .fingerprint_reader(Cursor::new(&data))
            .unwrap();
        assert_eq!(small, large);
        assert_eq!(small, fingerprint_bytes(&data));
    }

    #[test]
    fn test_fingerprint_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let fp = Fingerprinter::default().fingerprint_file(&path).unwrap();
        assert_eq!(fp, fingerprint_bytes(b"hello world"));
    }

    #[test]
    fn test_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = Fingerprinter::default()
            .fingerprint_file(&tmp.path().join("nope.bin"))
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }
}
