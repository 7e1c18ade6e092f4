//! In-memory staging area.
//!
//! Files added to the index are uploaded immediately (dedup applies), and the
//! collected `remote path -> address` map is committed as one snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use crate::client::Vault;
use crate::error::{Result, VaultError};
use crate::object::{CommitRequest, ContentAddress};
use crate::transport::{DataTransport, MetaTransport};
use crate::upload::canonical_remote_path;

/// Staged uploads awaiting a commit
pub struct Index<'a, T> {
    vault: &'a Vault<T>,
    entries: BTreeMap<String, ContentAddress>,
}

impl<'a, T: DataTransport + MetaTransport> Index<'a, T> {
    pub fn new(vault: &'a Vault<T>) -> Self {
        Self {
            vault,
            entries: BTreeMap::new(),
        }
    }

    /// Upload `local` and stage it under `remote` (defaults to its canonical
    /// relative path).
    pub fn add(&mut self, local: &Path, remote: Option<&str>) -> Result<ContentAddress> {
        if !local.exists() {
            return Err(VaultError::NotFound(local.to_path_buf()));
        }
        let remote = match remote {
            Some(r) => r.trim_start_matches('/').to_string(),
            None => canonical_remote_path(local),
        };
        tracing::info!("Adding {} <- {}", remote, local.display());

        let address = self.vault.upload(local)?;
        self.entries.insert(remote, address.clone());
        Ok(address)
    }

    pub fn entries(&self) -> &BTreeMap<String, ContentAddress> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unstage a path
    pub fn remove(&mut self, remote: &str) -> Option<ContentAddress> {
        self.entries.remove(remote)
    }

    /// Build a tree from the staged entries and commit it on `branch`.
    ///
    /// Returns `None` without contacting the server when nothing is staged.
    /// The index is cleared only after the commit succeeds.
    pub fn commit(&mut self, message: &str, branch: &str, author: &str) -> Result<Option<String>> {
        if self.entries.is_empty() {
            tracing::warn!("Nothing to commit (staging area is empty)");
            return Ok(None);
        }
        tracing::info!("Committing {} files to {}", self.entries.len(), branch);

        let transport = self.vault.transport();
        let tree_hash = transport.build_tree(&self.entries)?;
        tracing::debug!("Tree built: {}", tree_hash);

        let commit_hash = transport.commit(&CommitRequest {
            tree_hash,
            message: message.to_string(),
            branch: branch.to_string(),
            author: author.to_string(),
        })?;
        tracing::info!("Commit successful: {}", commit_hash);

        self.entries.clear();
        Ok(Some(commit_hash))
    }
}
