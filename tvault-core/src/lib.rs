//! TensorVault Core Library
//!
//! Client-side data path for a content-addressed store:
//! - Linear fingerprinting of local files (dedup key, integrity)
//! - Fixed-size network chunking of upload streams
//! - Two-phase upload (existence check, then stream on a miss)
//! - Buffered stream reader over server-driven downloads
//! - Staging index committing uploads as snapshots
//! - Whole-blob content store and in-memory transport
//! - Length-delimited wire codec shared with the HTTP server

pub mod chunker;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod memory;
pub mod object;
pub mod reader;
pub mod store;
pub mod transport;
pub mod upload;
pub mod wire;

pub use chunker::{ChunkEmitter, DEFAULT_CHUNK_SIZE, FrameStats, UploadFrames};
pub use client::Vault;
pub use config::ClientConfig;
pub use error::{Result, TransportError, TransportErrorKind, VaultError};
pub use fingerprint::{Fingerprinter, HASH_BUFFER_SIZE, fingerprint_bytes};
pub use index::Index;
pub use memory::MemoryTransport;
pub use object::{
    CheckRequest, Commit, CommitRequest, ContentAddress, ErrorBody, ExistenceCheck,
    FileFingerprint, HashResponse, Head, ObjectId, StoredBlob, Tree, TreeRequest, UploadFrame,
    UploadReceipt, UploadResponse,
};
pub use reader::{CloseHandle, StreamReader, StreamState};
pub use store::ContentStore;
pub use transport::{DataTransport, FrameSource, MetaTransport};
pub use upload::{Uploader, canonical_remote_path};
