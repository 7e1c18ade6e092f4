//! In-process transport over a [`ContentStore`].
//!
//! Useful for embedding and for exercising the upload and download paths
//! without a network. Call counters expose what crossed the boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chunker::{DEFAULT_CHUNK_SIZE, UploadFrames};
use crate::error::{Result, VaultError};
use crate::object::{CommitRequest, ContentAddress, ExistenceCheck, Head, UploadFrame};
use crate::store::ContentStore;
use crate::transport::{DataTransport, FrameSource, MetaTransport};
use crate::wire::BufferedFrames;

/// Transport that talks to a store in the same process
pub struct MemoryTransport {
    store: Arc<ContentStore>,
    download_frame_size: usize,
    check_calls: AtomicU64,
    upload_calls: AtomicU64,
    chunk_frames: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Transport over a fresh volatile store
    pub fn new() -> Self {
        Self::with_store(Arc::new(ContentStore::in_memory()))
    }

    pub fn with_store(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            download_frame_size: DEFAULT_CHUNK_SIZE,
            check_calls: AtomicU64::new(0),
            upload_calls: AtomicU64::new(0),
            chunk_frames: AtomicU64::new(0),
        }
    }

    /// Size of the blocks served by `download_stream`
    pub fn with_download_frame_size(mut self, size: usize) -> Self {
        self.download_frame_size = size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn check_calls(&self) -> u64 {
        self.check_calls.load(Ordering::Relaxed)
    }

    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::Relaxed)
    }

    /// Chunk frames received across all uploads
    pub fn chunk_frames_received(&self) -> u64 {
        self.chunk_frames.load(Ordering::Relaxed)
    }
}

impl DataTransport for MemoryTransport {
    fn check_existence(&self, digest: &str, size: u64) -> Result<ExistenceCheck> {
        self.check_calls.fetch_add(1, Ordering::Relaxed);
        self.store.check(digest, size)
    }

    fn upload_stream(&self, frames: UploadFrames) -> Result<ContentAddress> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        let counted = frames.map(|frame| {
            let frame = frame.map_err(VaultError::from)?;
            if let UploadFrame::Chunk { .. } = frame {
                self.chunk_frames.fetch_add(1, Ordering::Relaxed);
            }
            Ok(frame)
        });
        let (address, _) = self.store.ingest(counted)?;
        Ok(address)
    }

    fn download_stream(&self, address: &ContentAddress) -> Result<Box<dyn FrameSource>> {
        let data = self.store.get(address)?;
        Ok(Box::new(BufferedFrames::split(data, self.download_frame_size)))
    }
}

impl MetaTransport for MemoryTransport {
    fn get_head(&self, branch: &str) -> Result<Head> {
        Ok(self.store.head(branch))
    }

    fn build_tree(&self, entries: &BTreeMap<String, ContentAddress>) -> Result<String> {
        self.store.build_tree(entries)
    }

    fn commit(&self, request: &CommitRequest) -> Result<String> {
        self.store.commit(request)
    }
}
