//! Error types for the hot-update and package-cache subsystem.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for hot-update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors that can occur during hot-update and package-cache operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Failed to read a file or directory.
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// A network transfer failed (connection error or non-success status).
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// A network transfer exceeded its timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Content hash verification failed after a download or unpack.
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },

    /// Missing or malformed manifest, package index, or embedded index.
    #[error("configuration problem: {0}")]
    Configuration(String),

    /// Duplicate registration, release of an untracked handle, or a
    /// dependency cycle in a package index.
    #[error("cache consistency violated: {0}")]
    CacheConsistency(String),

    /// The requested fingerprint is absent from every loaded package index.
    #[error("no package entry for fingerprint {fingerprint:#018x}")]
    PackageNotFound { fingerprint: u64 },
}

impl UpdateError {
    /// Whether this error represents a retryable transfer failure.
    ///
    /// Integrity failures count: a corrupt download is discarded and
    /// re-fetched exactly like an absent file.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::Integrity { .. }
        )
    }
}
