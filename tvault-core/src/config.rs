//! Client configuration stored as JSON (default `~/.tvault/config.json`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::chunker::DEFAULT_CHUNK_SIZE;
use crate::error::{Result, VaultError};
use crate::fingerprint::HASH_BUFFER_SIZE;

/// Environment variable overriding `server_url`
pub const SERVER_ENV: &str = "TV_SERVER";

/// Client settings shared by the library and the `tv` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://localhost:8080`
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Upload frame size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fingerprinting read block size in bytes
    #[serde(default = "default_hash_buffer_size")]
    pub hash_buffer_size: usize,
    /// Per-request timeout; bounds every blocking pull
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Author recorded on commits
    #[serde(default = "default_author")]
    pub author: String,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_hash_buffer_size() -> usize {
    HASH_BUFFER_SIZE
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_author() -> String {
    "tv".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            hash_buffer_size: default_hash_buffer_size(),
            timeout_secs: default_timeout_secs(),
            author: default_author(),
        }
    }
}

impl ClientConfig {
    /// Load config from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&data).map_err(|e| {
            VaultError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path` (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Config(e.to_string()))?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVER_ENV) {
            if !url.trim().is_empty() {
                self.server_url = url;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(VaultError::Config("chunk_size must be positive".into()));
        }
        if self.hash_buffer_size == 0 {
            return Err(VaultError::Config("hash_buffer_size must be positive".into()));
        }
        if self.server_url.trim().is_empty() {
            return Err(VaultError::Config("server_url must not be empty".into()));
        }
        Ok(())
    }
}
