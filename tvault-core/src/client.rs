//! Client facade tying a transport to the upload and download paths.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::ClientConfig;
use crate::error::{Result, VaultError};
use crate::fingerprint::Fingerprinter;
use crate::index::Index;
use crate::object::{ContentAddress, FileFingerprint, UploadReceipt};
use crate::reader::StreamReader;
use crate::transport::{DataTransport, MetaTransport};
use crate::upload::Uploader;

/// Entry point for callers: `upload` files, `open_for_read` content.
///
/// The transport is acquired once and reused by every call.
pub struct Vault<T> {
    transport: T,
    config: ClientConfig,
}

impl<T: DataTransport> Vault<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn with_defaults(transport: T) -> Self {
        Self::new(transport, ClientConfig::default())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn uploader(&self) -> Uploader<'_, T> {
        Uploader::new(&self.transport)
            .with_chunk_size(self.config.chunk_size)
            .with_fingerprinter(Fingerprinter::new(self.config.hash_buffer_size))
    }

    /// Upload a local file, skipping the transfer if the server has it.
    pub fn upload(&self, path: &Path) -> Result<ContentAddress> {
        self.uploader().upload(path)
    }

    pub fn upload_detailed(&self, path: &Path) -> Result<UploadReceipt> {
        self.uploader().upload_detailed(path)
    }

    /// Open remote content as a lazily filled byte stream.
    pub fn open_for_read(&self, address: &ContentAddress) -> Result<StreamReader> {
        let source = self.transport.download_stream(address)?;
        tracing::debug!("Opened download of {}", address.short());
        Ok(StreamReader::new(source))
    }

    /// Stream remote content into `dest`.
    ///
    /// Returns the fingerprint of the written bytes. When `expected` is given
    /// and does not match, the partial file is removed and the call fails with
    /// an integrity error.
    pub fn download_to(
        &self,
        address: &ContentAddress,
        dest: &Path,
        expected: Option<&FileFingerprint>,
    ) -> Result<FileFingerprint> {
        let mut reader = self.open_for_read(address)?;
        let tmp_path = partial_path(dest);
        let written = match write_stream(&mut reader, &tmp_path, self.config.chunk_size) {
            Ok(fp) => fp,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        reader.close();

        if let Some(expected) = expected {
            if &written != expected {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(VaultError::Integrity(format!(
                    "downloaded {} does not match expected {}",
                    written, expected
                )));
            }
        }
        std::fs::rename(&tmp_path, dest)?;
        tracing::info!("Downloaded {} to {}", address.short(), dest.display());
        Ok(written)
    }
}

impl<T: DataTransport + MetaTransport> Vault<T> {
    /// Staging area that uploads files and commits them together
    pub fn index(&self) -> Index<'_, T> {
        Index::new(self)
    }
}

/// `dest` with `.part` appended, so distinct destinations never share one
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn write_stream(reader: &mut StreamReader, path: &Path, block: usize) -> Result<FileFingerprint> {
    let mut file = File::create(path)?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    loop {
        let data = reader.read_best_effort(block)?;
        if data.is_empty() {
            break;
        }
        hasher.update(&data);
        file.write_all(&data)?;
        size += data.len() as u64;
    }
    file.sync_all()?;
    Ok(FileFingerprint::new(hex::encode(hasher.finalize()), size))
}
