//! Runtime configuration for the hot-update subsystem.

use std::path::PathBuf;
use std::time::Duration;

/// Default process-wide budget of concurrent download workers.
pub const DEFAULT_MAX_DOWNLOAD_THREADS: usize = 3;

/// Default timeout for manifest fetches (package transfers use the
/// transport default).
pub const DEFAULT_MANIFEST_TIMEOUT_SECS: u64 = 30;

/// Default number of transfer attempts per package before the failure
/// callback fires.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How a module's packages reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotUpdateMode {
    /// Packages ship inside the install image only; update requests
    /// complete immediately without any network activity.
    Embedded,
    /// Packages are hot-updated from the remote manifest.
    Hot,
}

/// Configuration for a [`crate::runtime::HotPatchRuntime`].
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Base URL manifests and packages are fetched from.
    pub download_base_url: String,

    /// Writable application-data directory (manifests, hot packages,
    /// unpacked embedded packages).
    pub data_dir: PathBuf,

    /// Read-only root of embedded packages inside the install image.
    pub embedded_root: PathBuf,

    /// Hot-update mode for all modules served by this runtime.
    pub mode: HotUpdateMode,

    /// Process-wide budget of concurrent download workers, shared across
    /// all simultaneously updating modules.
    pub max_download_threads: usize,

    /// Timeout for manifest fetches.
    pub manifest_timeout: Duration,

    /// Transfer attempts per package before failing the entry.
    pub max_attempts: u32,
}

impl UpdateConfig {
    /// Create a configuration with default limits.
    pub fn new(
        download_base_url: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        embedded_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            download_base_url: download_base_url.into(),
            data_dir: data_dir.into(),
            embedded_root: embedded_root.into(),
            mode: HotUpdateMode::Hot,
            max_download_threads: DEFAULT_MAX_DOWNLOAD_THREADS,
            manifest_timeout: Duration::from_secs(DEFAULT_MANIFEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the hot-update mode.
    pub fn with_mode(mut self, mode: HotUpdateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the worker budget (minimum 1).
    pub fn with_max_download_threads(mut self, count: usize) -> Self {
        self.max_download_threads = count.max(1);
        self
    }

    /// Set the manifest fetch timeout.
    pub fn with_manifest_timeout(mut self, timeout: Duration) -> Self {
        self.manifest_timeout = timeout;
        self
    }

    /// Set the per-package attempt bound (minimum 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}
