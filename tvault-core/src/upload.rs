//! Two-phase upload: fingerprint, existence check, then stream on a miss.
//!
//! A hit means the server already holds the exact bytes and nothing is
//! streamed. A miss streams one `Meta` frame followed by the file's chunks as
//! a single request. Any failure aborts the call without an address; retrying
//! is left to the caller and is safe because the protocol is keyed by digest.

use std::path::{Component, Path};

use crate::chunker::{DEFAULT_CHUNK_SIZE, UploadFrames};
use crate::error::{Result, VaultError};
use crate::fingerprint::{Fingerprinter, open_existing};
use crate::object::{ContentAddress, UploadReceipt};
use crate::transport::DataTransport;

/// Runs the upload protocol against a transport
pub struct Uploader<'a, T: DataTransport + ?Sized> {
    transport: &'a T,
    fingerprinter: Fingerprinter,
    chunk_size: usize,
}

impl<'a, T: DataTransport + ?Sized> Uploader<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            fingerprinter: Fingerprinter::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    /// Upload a local file and return its content address.
    pub fn upload(&self, path: &Path) -> Result<ContentAddress> {
        self.upload_detailed(path).map(|receipt| receipt.address)
    }

    /// Upload a local file and report how the address was obtained.
    pub fn upload_detailed(&self, path: &Path) -> Result<UploadReceipt> {
        if !path.exists() {
            return Err(VaultError::NotFound(path.to_path_buf()));
        }

        let fingerprint = self.fingerprinter.fingerprint_file(path)?;
        tracing::debug!("Checking {} ({})", path.display(), fingerprint);

        let check = self
            .transport
            .check_existence(&fingerprint.digest, fingerprint.size)?;

        if check.exists {
            let address = match check.address {
                Some(address) if !address.is_empty() => address,
                _ => {
                    return Err(VaultError::Integrity(format!(
                        "server reported {} as stored but returned no address",
                        fingerprint.digest
                    )));
                }
            };
            tracing::info!(
                "Instant upload for {} (digest {}, address {})",
                path.display(),
                fingerprint.short(),
                address.short()
            );
            return Ok(UploadReceipt {
                address,
                fingerprint,
                deduplicated: true,
                chunks_sent: 0,
            });
        }

        let file = open_existing(path)?;
        let frames = UploadFrames::new(
            canonical_remote_path(path),
            fingerprint.digest.clone(),
            Box::new(file),
            self.chunk_size,
        );
        let stats = frames.stats();

        tracing::debug!(
            "Streaming {} in {}-byte frames",
            path.display(),
            self.chunk_size
        );
        let address = self.transport.upload_stream(frames)?;

        if stats.bytes() != fingerprint.size {
            return Err(VaultError::Integrity(format!(
                "{} changed during upload: fingerprinted {} bytes, streamed {}",
                path.display(),
                fingerprint.size,
                stats.bytes()
            )));
        }
        if address.is_empty() {
            return Err(VaultError::Integrity(
                "server finalized upload without an address".into(),
            ));
        }

        tracing::info!(
            "Uploaded {} ({} bytes, {} frames) -> {}",
            path.display(),
            fingerprint.size,
            stats.chunks(),
            address.short()
        );
        Ok(UploadReceipt {
            address,
            fingerprint,
            deduplicated: false,
            chunks_sent: stats.chunks(),
        })
    }
}

/// Relative path recorded in the upload's `Meta` frame.
///
/// Relative paths are normalized to `/` separators; absolute paths under the
/// working directory are made relative to it; anything else keeps only its
/// file name.
pub fn canonical_remote_path(path: &Path) -> String {
    let relative = if path.is_absolute() {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| path.strip_prefix(&cwd).ok().map(Path::to_path_buf))
    } else {
        Some(path.to_path_buf())
    };

    let joined = relative.and_then(|rel| {
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        (!parts.is_empty()).then(|| parts.join("/"))
    });

    joined.unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string())
    })
}
