//! Transport boundary.
//!
//! The core never builds connections itself; a transport is acquired once per
//! client and handed in. Implementations report failures as
//! [`TransportError`](crate::error::TransportError) converted into
//! [`VaultError`](crate::error::VaultError), so local I/O failures that occur
//! while a transport drains an upload still surface as `Io`.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::chunker::UploadFrames;
use crate::error::Result;
use crate::object::{CommitRequest, ContentAddress, ExistenceCheck, Head};

/// Forward-only sequence of server-sent blocks.
///
/// `next_frame` blocks until a block or end-of-stream arrives. `Ok(None)` is
/// end-of-stream; after it, or after an error, no further blocks are produced.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

impl<F: FrameSource + ?Sized> FrameSource for Box<F> {
    fn next_frame(&mut self) -> Result<Option<Bytes>> {
        (**self).next_frame()
    }
}

/// Data plane: existence checks, streaming upload and download
pub trait DataTransport: Send + Sync {
    /// Ask whether content with this linear digest and size is already stored
    fn check_existence(&self, digest: &str, size: u64) -> Result<ExistenceCheck>;

    /// Submit one upload frame sequence and block until the server finalizes it
    fn upload_stream(&self, frames: UploadFrames) -> Result<ContentAddress>;

    /// Open a download of previously stored content
    fn download_stream(&self, address: &ContentAddress) -> Result<Box<dyn FrameSource>>;
}

/// Metadata plane: snapshot trees, commits and branch pointers
pub trait MetaTransport: Send + Sync {
    fn get_head(&self, branch: &str) -> Result<Head>;

    /// Build a tree from `remote path -> address` entries; returns its hash
    fn build_tree(&self, entries: &BTreeMap<String, ContentAddress>) -> Result<String>;

    /// Record a commit and move the branch; returns the commit hash
    fn commit(&self, request: &CommitRequest) -> Result<String>;
}

impl<T: DataTransport + ?Sized> DataTransport for &T {
    fn check_existence(&self, digest: &str, size: u64) -> Result<ExistenceCheck> {
        (**self).check_existence(digest, size)
    }

    fn upload_stream(&self, frames: UploadFrames) -> Result<ContentAddress> {
        (**self).upload_stream(frames)
    }

    fn download_stream(&self, address: &ContentAddress) -> Result<Box<dyn FrameSource>> {
        (**self).download_stream(address)
    }
}

impl<T: MetaTransport + ?Sized> MetaTransport for &T {
    fn get_head(&self, branch: &str) -> Result<Head> {
        (**self).get_head(branch)
    }

    fn build_tree(&self, entries: &BTreeMap<String, ContentAddress>) -> Result<String> {
        (**self).build_tree(entries)
    }

    fn commit(&self, request: &CommitRequest) -> Result<String> {
        (**self).commit(request)
    }
}
