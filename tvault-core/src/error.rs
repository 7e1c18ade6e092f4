//! Error taxonomy for the tvault data path.
//!
//! Transports report categorized [`TransportError`]s; everything the core
//! exposes to callers is a [`VaultError`].

use std::fmt;
use std::path::PathBuf;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors surfaced by the upload and download paths
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Local source does not exist
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Transport could not reach the server
    #[error("Network error: {0}")]
    Network(String),

    /// Remote internal fault
    #[error("Server error: {0}")]
    Server(String),

    /// Server contract violation or content corruption
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The server does not know the requested content
    #[error("Unknown content address: {0}")]
    UnknownAddress(String),

    /// Malformed frame or wire violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Error returned by any read on a closed stream
    pub fn closed_stream() -> Self {
        VaultError::Io(std::io::Error::other("operation on closed stream"))
    }

    /// True when retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Network(_) | VaultError::Server(_))
    }
}

/// Failure category reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connectivity failure or timeout
    Unavailable,
    /// Content corrupted in flight or at rest
    DataLoss,
    /// Server fault
    Internal,
    /// Requested content does not exist remotely
    NotFound,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Unavailable => "unavailable",
            TransportErrorKind::DataLoss => "data-loss",
            TransportErrorKind::Internal => "internal",
            TransportErrorKind::NotFound => "not-found",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Categorized failure from a transport call
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unavailable, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::DataLoss, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }
}

impl From<TransportError> for VaultError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Unavailable => VaultError::Network(err.message),
            TransportErrorKind::DataLoss => VaultError::Integrity(err.message),
            TransportErrorKind::Internal => VaultError::Server(err.message),
            TransportErrorKind::NotFound => VaultError::UnknownAddress(err.message),
            TransportErrorKind::Other => VaultError::Server(err.to_string()),
        }
    }
}
