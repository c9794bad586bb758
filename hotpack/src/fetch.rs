//! Remote fetching and file verification.
//!
//! Defines the trait seams the update pipeline talks through
//! ([`ManifestFetcher`], [`PackageFetcher`]) plus the production HTTP
//! implementation and the SHA-256 helpers used to verify package files
//! on disk. Tests substitute in-memory fetchers behind the same traits.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use crate::error::{UpdateError, UpdateResult};
use crate::manifest::Manifest;

/// Buffer size for streaming reads and checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Callback invoked with the number of bytes read since the last call.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Fetches patch manifests from the update server.
pub trait ManifestFetcher: Send + Sync {
    /// Fetch and parse the manifest at `url`.
    fn fetch_manifest(&self, url: &str) -> UpdateResult<Manifest>;
}

/// Fetches package files from the update server.
pub trait PackageFetcher: Send + Sync {
    /// Download `url` to `dest`, reporting byte deltas via `progress`.
    ///
    /// Returns the total number of bytes written. The destination is
    /// only replaced once the transfer completes.
    fn fetch_package(&self, url: &str, dest: &Path, progress: ProgressFn) -> UpdateResult<u64>;
}

/// HTTP fetcher backed by a blocking `reqwest` client.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout.
    pub fn new(timeout: Duration) -> UpdateResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::Configuration(format!("build HTTP client: {e}")))?;

        Ok(Self { client, timeout })
    }

    fn map_request_error(&self, url: &str, e: reqwest::Error) -> UpdateError {
        if e.is_timeout() {
            UpdateError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            UpdateError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl ManifestFetcher for HttpFetcher {
    fn fetch_manifest(&self, url: &str) -> UpdateResult<Manifest> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.map_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network {
                url: url.to_string(),
                reason: format!("GET request failed with status {status}"),
            });
        }

        let body = response.text().map_err(|e| self.map_request_error(url, e))?;
        serde_json::from_str(&body).map_err(|e| UpdateError::Network {
            url: url.to_string(),
            reason: format!("invalid manifest: {e}"),
        })
    }
}

impl PackageFetcher for HttpFetcher {
    fn fetch_package(&self, url: &str, dest: &Path, progress: ProgressFn) -> UpdateResult<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.map_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network {
                url: url.to_string(),
                reason: format!("GET request failed with status {status}"),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| UpdateError::CreateDirFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        download_to(&mut response, url, dest, progress)
    }
}

/// Sidecar path a transfer streams into before the final rename.
///
/// The suffix is appended rather than substituted so packages that
/// differ only in extension never share a sidecar.
fn sidecar_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Stream `reader` into a sidecar next to `dest`, then rename it over
/// the destination so a partially transferred package never
/// masquerades as a complete one. The sidecar is removed if the
/// transfer fails.
fn download_to(
    reader: &mut dyn Read,
    url: &str,
    dest: &Path,
    progress: ProgressFn,
) -> UpdateResult<u64> {
    let temp_path = sidecar_path(dest);
    let result = stream_to(reader, url, &temp_path, progress).and_then(|downloaded| {
        fs::rename(&temp_path, dest)
            .map_err(|source| UpdateError::WriteFailed {
                path: dest.to_path_buf(),
                source,
            })
            .map(|_| downloaded)
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn stream_to(
    reader: &mut dyn Read,
    url: &str,
    temp_path: &Path,
    progress: ProgressFn,
) -> UpdateResult<u64> {
    let file = File::create(temp_path).map_err(|source| UpdateError::WriteFailed {
        path: temp_path.to_path_buf(),
        source,
    })?;

    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut downloaded = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| UpdateError::Network {
            url: url.to_string(),
            reason: format!("read error: {e}"),
        })?;

        if bytes_read == 0 {
            break;
        }

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|source| UpdateError::WriteFailed {
                path: temp_path.to_path_buf(),
                source,
            })?;

        downloaded += bytes_read as u64;
        progress(bytes_read as u64);
    }

    writer.flush().map_err(|source| UpdateError::WriteFailed {
        path: temp_path.to_path_buf(),
        source,
    })?;

    Ok(downloaded)
}

/// Calculate the lowercase hex SHA-256 checksum of a file.
pub fn calculate_file_checksum(path: &Path) -> UpdateResult<String> {
    let mut file = File::open(path).map_err(|source| UpdateError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|source| UpdateError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a file against an expected SHA-256 checksum.
pub fn verify_checksum(path: &Path, expected: &str) -> UpdateResult<()> {
    let actual = calculate_file_checksum(path)?;
    if actual != expected {
        return Err(UpdateError::Integrity {
            name: path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
