//! Whole-blob content store backing the reference server and the in-memory
//! transport.
//!
//! Content is addressed by the SHA-256 of its serialized [`StoredBlob`]
//! record; a separate linear index maps `digest -> (address, size)` so that
//! existence checks can be answered from a client fingerprint. Metadata
//! (trees, commits, branch heads) lives alongside.
//!
//! With a root directory, blobs are written to `objects/<2 hex>/<62 hex>` and
//! the index and metadata to `state.json` (temp file + rename).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::object::{
    Commit, CommitRequest, ContentAddress, ExistenceCheck, Head, StoredBlob, Tree, UploadFrame,
    is_valid_digest,
};

/// Linear index entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub address: ContentAddress,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchHead {
    commit: String,
    version: u64,
}

/// Persisted index and metadata
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    index: HashMap<String, IndexEntry>,
    trees: HashMap<String, Tree>,
    commits: HashMap<String, Commit>,
    heads: HashMap<String, BranchHead>,
    /// Known addresses, also used for prefix expansion
    addresses: BTreeMap<ContentAddress, u64>,
    #[serde(skip)]
    blobs: HashMap<ContentAddress, Bytes>,
}

/// Content store with an optional on-disk root
pub struct ContentStore {
    root: Option<PathBuf>,
    state: RwLock<StoreState>,
    /// Held across temp file write and rename
    disk_lock: Mutex<()>,
}

impl ContentStore {
    /// Volatile store
    pub fn in_memory() -> Self {
        Self {
            root: None,
            state: RwLock::new(StoreState::default()),
            disk_lock: Mutex::new(()),
        }
    }

    /// Open or create a store rooted at `root`
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join("objects"))?;
        let state_path = root.join("state.json");
        let state = if state_path.exists() {
            let data = fs::read_to_string(&state_path)?;
            serde_json::from_str(&data)
                .map_err(|e| VaultError::Config(format!("corrupt store state: {}", e)))?
        } else {
            StoreState::default()
        };
        tracing::info!(
            "Opened content store at {} ({} objects)",
            root.display(),
            state.addresses.len()
        );
        Ok(Self {
            root: Some(root.to_path_buf()),
            state: RwLock::new(state),
            disk_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.read_state().addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer an existence check for a client fingerprint.
    ///
    /// A digest match with a different size, or an index entry whose blob has
    /// vanished, is reported as a miss so the client uploads again.
    pub fn check(&self, digest: &str, size: u64) -> Result<ExistenceCheck> {
        if !is_valid_digest(digest) {
            return Err(VaultError::Protocol(format!("invalid sha256: {}", digest)));
        }
        let entry = match self.read_state().index.get(digest) {
            Some(entry) => entry.clone(),
            None => return Ok(ExistenceCheck::miss()),
        };
        if entry.size != size {
            tracing::warn!(
                "Digest {} indexed with {} bytes but check claims {}; forcing re-upload",
                digest,
                entry.size,
                size
            );
            return Ok(ExistenceCheck::miss());
        }
        if !self.has_blob(&entry.address)? {
            tracing::warn!(
                "Index entry for {} points at missing object {}",
                digest,
                entry.address
            );
            return Ok(ExistenceCheck::miss());
        }
        tracing::debug!("Instant upload for {} -> {}", &digest[..8], entry.address.short());
        Ok(ExistenceCheck::hit(entry.address))
    }

    /// Consume one upload frame sequence, verify it and store the content.
    pub fn ingest<I>(&self, frames: I) -> Result<(ContentAddress, u64)>
    where
        I: IntoIterator<Item = Result<UploadFrame>>,
    {
        let mut frames = frames.into_iter();
        let (path, claimed) = match frames.next() {
            None => {
                return Err(VaultError::Protocol(
                    "empty stream: expected metadata frame".into(),
                ));
            }
            Some(frame) => match frame? {
                UploadFrame::Meta { path, digest } => (path, digest),
                UploadFrame::Chunk { .. } => {
                    return Err(VaultError::Protocol(
                        "first frame must be file metadata".into(),
                    ));
                }
            },
        };
        if !is_valid_digest(&claimed) {
            return Err(VaultError::Protocol(format!(
                "invalid sha256 in metadata: {}",
                claimed
            )));
        }
        tracing::debug!("Receiving {} (claimed {})", path, &claimed[..8]);

        let mut hasher = Sha256::new();
        let mut data = BytesMut::new();
        for frame in frames {
            match frame? {
                UploadFrame::Chunk { data: chunk } => {
                    hasher.update(&chunk);
                    data.extend_from_slice(&chunk);
                }
                UploadFrame::Meta { .. } => {
                    return Err(VaultError::Protocol("duplicate metadata frame".into()));
                }
            }
        }

        let actual = hex::encode(hasher.finalize());
        if actual != claimed {
            tracing::warn!("Integrity check failed for {}: claimed {}, got {}", path, claimed, actual);
            return Err(VaultError::Integrity(
                "integrity check failed: data corruption detected".into(),
            ));
        }

        let size = data.len() as u64;
        let blob = StoredBlob::new(data.freeze(), actual.clone());
        let address = ContentAddress::new(blob.id().to_hex());
        self.put_blob(&address, &blob)?;

        {
            let mut state = self.write_state();
            state.addresses.insert(address.clone(), size);
            state.index.insert(
                actual.clone(),
                IndexEntry {
                    address: address.clone(),
                    size,
                },
            );
        }
        if let Err(e) = self.persist() {
            // the blob is stored; only future dedup is lost
            tracing::warn!("Failed to save file index: {}", e);
        }

        tracing::info!("Stored {} ({} bytes) as {}", path, size, address.short());
        Ok((address, size))
    }

    /// Fetch stored content
    pub fn get(&self, address: &ContentAddress) -> Result<Bytes> {
        if let Some(data) = self.read_state().blobs.get(address) {
            return Ok(data.clone());
        }
        let Some(path) = self.object_path(address) else {
            return Err(VaultError::UnknownAddress(address.to_string()));
        };
        if !path.exists() {
            return Err(VaultError::UnknownAddress(address.to_string()));
        }
        let raw = fs::read(&path)?;
        let blob = StoredBlob::from_bytes(&raw)
            .map_err(|e| VaultError::Integrity(format!("corrupt object {}: {}", address, e)))?;
        Ok(blob.data)
    }

    /// Resolve a full address or an unambiguous prefix
    pub fn expand(&self, prefix: &str) -> Result<ContentAddress> {
        let state = self.read_state();
        let mut matches = state
            .addresses
            .keys()
            .filter(|addr| addr.as_str().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(addr), None) => Ok(addr.clone()),
            (None, _) => Err(VaultError::UnknownAddress(prefix.to_string())),
            (Some(_), Some(_)) => Err(VaultError::Protocol(format!(
                "hash prefix {} is ambiguous",
                prefix
            ))),
        }
    }

    /// Record a tree after checking that every entry is stored
    pub fn build_tree(&self, entries: &BTreeMap<String, ContentAddress>) -> Result<String> {
        {
            let state = self.read_state();
            if let Some((path, addr)) = entries
                .iter()
                .find(|(_, addr)| !state.addresses.contains_key(*addr))
            {
                return Err(VaultError::UnknownAddress(format!("{} ({})", addr, path)));
            }
        }
        let tree = Tree::new(entries.clone());
        let hash = tree.id().to_hex();
        let added = self.write_state().trees.insert(hash.clone(), tree).is_none();
        if let Err(e) = self.persist() {
            if added {
                self.write_state().trees.remove(&hash);
            }
            return Err(e);
        }
        Ok(hash)
    }

    /// Record a commit on top of the branch head and advance the branch
    pub fn commit(&self, request: &CommitRequest) -> Result<String> {
        let (hash, previous) = {
            let mut state = self.write_state();
            if !state.trees.contains_key(&request.tree_hash) {
                return Err(VaultError::UnknownAddress(format!("tree {}", request.tree_hash)));
            }
            let previous = state.heads.get(&request.branch).cloned();
            let version = previous.as_ref().map(|h| h.version).unwrap_or(0) + 1;
            let commit = Commit {
                tree_hash: request.tree_hash.clone(),
                parent: previous.as_ref().map(|h| h.commit.clone()),
                author: request.author.clone(),
                message: request.message.clone(),
                timestamp: chrono::Utc::now().timestamp(),
            };
            let hash = commit.id().to_hex();
            state.commits.insert(hash.clone(), commit);
            state.heads.insert(
                request.branch.clone(),
                BranchHead {
                    commit: hash.clone(),
                    version,
                },
            );
            (hash, previous)
        };
        if let Err(e) = self.persist() {
            // a failed commit must leave the branch where it was
            let mut state = self.write_state();
            let still_ours = state
                .heads
                .get(&request.branch)
                .is_some_and(|head| head.commit == hash);
            if still_ours {
                state.commits.remove(&hash);
                match previous {
                    Some(head) => state.heads.insert(request.branch.clone(), head),
                    None => state.heads.remove(&request.branch),
                };
            }
            return Err(e);
        }
        tracing::info!("Branch {} -> {}", request.branch, &hash[..8]);
        Ok(hash)
    }

    pub fn head(&self, branch: &str) -> Head {
        match self.read_state().heads.get(branch) {
            Some(head) => Head {
                exists: true,
                hash: Some(head.commit.clone()),
                version: head.version,
            },
            None => Head::default(),
        }
    }

    /// Commit record by hash
    pub fn get_commit(&self, hash: &str) -> Option<Commit> {
        self.read_state().commits.get(hash).cloned()
    }

    /// Tree record by hash
    pub fn get_tree(&self, hash: &str) -> Option<Tree> {
        self.read_state().trees.get(hash).cloned()
    }

    /// Drop a stored blob while keeping its index entry
    pub fn remove_blob(&self, address: &ContentAddress) -> Result<()> {
        {
            let mut state = self.write_state();
            state.blobs.remove(address);
            state.addresses.remove(address);
        }
        if let Some(path) = self.object_path(address) {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        self.persist()
    }

    fn has_blob(&self, address: &ContentAddress) -> Result<bool> {
        if self.read_state().blobs.contains_key(address) {
            return Ok(true);
        }
        Ok(self.object_path(address).is_some_and(|p| p.exists()))
    }

    fn put_blob(&self, address: &ContentAddress, blob: &StoredBlob) -> Result<()> {
        match self.object_path(address) {
            Some(path) => {
                if path.exists() {
                    return Ok(());
                }
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let raw = blob
                    .to_bytes()
                    .map_err(|e| VaultError::Protocol(format!("encode failed: {}", e)))?;
                let _guard = self.lock_disk();
                if path.exists() {
                    return Ok(());
                }
                let tmp = path.with_extension("tmp");
                fs::write(&tmp, raw)?;
                fs::rename(&tmp, &path)?;
            }
            None => {
                self.write_state()
                    .blobs
                    .insert(address.clone(), blob.data.clone());
            }
        }
        Ok(())
    }

    fn object_path(&self, address: &ContentAddress) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let hex = address.as_str();
        if hex.len() < 3 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(root.join("objects").join(&hex[..2]).join(&hex[2..]))
    }

    fn persist(&self) -> Result<()> {
        let Some(root) = self.root.as_ref() else {
            return Ok(());
        };
        // serialize under the lock so the last rename carries the latest state
        let _guard = self.lock_disk();
        let data = serde_json::to_string_pretty(&*self.read_state())
            .map_err(|e| VaultError::Protocol(format!("encode failed: {}", e)))?;
        let path = root.join("state.json");
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock_disk(&self) -> std::sync::MutexGuard<'_, ()> {
        self.disk_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
