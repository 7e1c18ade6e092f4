//! Core value types for tvault
//!
//! Fingerprints identify local bytes, content addresses identify stored
//! content, and upload frames carry one file to the server.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 32-byte SHA-256 identifier used by the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Returns true if `s` is a 64-character lowercase hex SHA-256 digest
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Whole-file linear digest plus size.
///
/// Used as the dedup key and for end-to-end integrity checks. It is never the
/// address content is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Lowercase hex SHA-256 of the full byte sequence
    pub digest: String,
    /// Byte count
    pub size: u64,
}

impl FileFingerprint {
    pub fn new(digest: impl Into<String>, size: u64) -> Self {
        Self {
            digest: digest.into(),
            size,
        }
    }

    /// First eight digest characters, for log lines
    pub fn short(&self) -> &str {
        &self.digest[..self.digest.len().min(8)]
    }
}

impl std::fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.digest, self.size)
    }
}

/// Opaque server-assigned handle for stored content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First eight characters, for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One frame of a streaming upload.
///
/// A well-formed upload is exactly one `Meta` followed by zero or more `Chunk`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadFrame {
    Meta {
        /// Canonical relative path of the local file
        path: String,
        /// Linear digest the server must reproduce
        digest: String,
    },
    Chunk { data: Bytes },
}

impl UploadFrame {
    pub fn is_meta(&self) -> bool {
        matches!(self, UploadFrame::Meta { .. })
    }

    /// Payload length of a chunk frame (0 for meta)
    pub fn payload_len(&self) -> usize {
        match self {
            UploadFrame::Meta { .. } => 0,
            UploadFrame::Chunk { data } => data.len(),
        }
    }
}

/// Server answer to an existence check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceCheck {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ContentAddress>,
}

impl ExistenceCheck {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn hit(address: ContentAddress) -> Self {
        Self {
            exists: true,
            address: Some(address),
        }
    }
}

/// Outcome of one upload call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub address: ContentAddress,
    pub fingerprint: FileFingerprint,
    /// True when the server already held the content and nothing was streamed
    pub deduplicated: bool,
    /// Number of chunk frames sent
    pub chunks_sent: u64,
}

/// Stored content record; its serialized form is what the store addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlob {
    /// Raw content data
    pub data: Bytes,
    /// Linear digest supplied at upload time
    pub digest: String,
}

impl StoredBlob {
    pub fn new(data: Bytes, digest: String) -> Self {
        Self { data, digest }
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary format
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&bincode::serialize(self).unwrap_or_default())
    }
}

/// Snapshot tree: remote path -> content address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Sorted entries for deterministic hashing
    pub entries: BTreeMap<String, ContentAddress>,
}

impl Tree {
    pub fn new(entries: BTreeMap<String, ContentAddress>) -> Self {
        Self { entries }
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&bincode::serialize(self).unwrap_or_default())
    }
}

/// Request to record a snapshot on a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub tree_hash: String,
    pub message: String,
    pub branch: String,
    pub author: String,
}

/// Commit record kept by the metadata service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub tree_hash: String,
    /// Previous head of the branch, if any
    pub parent: Option<String>,
    pub author: String,
    pub message: String,
    /// Commit timestamp (Unix seconds)
    pub timestamp: i64,
}

impl Commit {
    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&bincode::serialize(self).unwrap_or_default())
    }
}

/// Branch pointer state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Number of commits recorded on the branch
    pub version: u64,
}

/// JSON body of `POST /data/check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub sha256: String,
    pub size: u64,
}

/// JSON answer to `POST /data/upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub address: ContentAddress,
    pub size: u64,
}

/// JSON body of `POST /meta/tree`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRequest {
    pub entries: BTreeMap<String, ContentAddress>,
}

/// JSON answer carrying a tree or commit hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResponse {
    pub hash: String,
}

/// JSON error body returned with every non-2xx status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
