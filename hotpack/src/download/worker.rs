//! Background worker threads.
//!
//! Each worker performs one blocking task and reports through the
//! event queue. Workers are detached; completion is observed via the
//! events they push, never by joining handles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::fetch::{verify_checksum, ManifestFetcher, PackageFetcher};
use crate::manifest::PatchEntry;

use super::events::{DownloadEvent, EventQueue};

/// Fetch a manifest on a background thread.
pub fn spawn_manifest_worker(
    queue: EventQueue,
    fetcher: Arc<dyn ManifestFetcher>,
    module: String,
    url: String,
) {
    thread::spawn(move || {
        debug!(module = %module, url = %url, "fetching manifest");
        let result = fetcher.fetch_manifest(&url);
        queue.push(DownloadEvent::ManifestFetched { module, result });
    });
}

/// Download one package on a background thread, retrying on failure.
///
/// Progress events are pushed as bytes arrive. When an attempt fails
/// after partial progress, a matching `ProgressDiscarded` event is
/// pushed so the controller's byte counters stay accurate across
/// retries. Exactly one terminal event (`PackageCompleted` or
/// `PackageFailed`) is pushed per package regardless of attempt count.
pub fn spawn_package_worker(
    queue: EventQueue,
    fetcher: Arc<dyn PackageFetcher>,
    module: String,
    entry: PatchEntry,
    url: String,
    dest: PathBuf,
    max_attempts: u32,
) {
    thread::spawn(move || {
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let attempt_bytes = AtomicU64::new(0);
            let progress_queue = queue.clone();
            let progress_module = module.clone();

            let result = fetcher.fetch_package(&url, &dest, &|bytes| {
                attempt_bytes.fetch_add(bytes, Ordering::Relaxed);
                progress_queue.push(DownloadEvent::Progress {
                    module: progress_module.clone(),
                    bytes,
                });
            });

            let result = result.and_then(|written| {
                verify_checksum(&dest, &entry.content_hash)?;
                Ok(written)
            });

            match result {
                Ok(_) => {
                    queue.push(DownloadEvent::PackageCompleted { module, entry });
                    return;
                }
                Err(error) => {
                    warn!(
                        module = %module,
                        package = %entry.package_name,
                        attempt,
                        max_attempts,
                        %error,
                        "package download attempt failed"
                    );

                    // Undo this attempt's partial progress.
                    let partial = attempt_bytes.load(Ordering::Relaxed);
                    if partial > 0 {
                        queue.push(DownloadEvent::ProgressDiscarded {
                            module: module.clone(),
                            bytes: partial,
                        });
                    }

                    let retryable = error.is_retryable();
                    last_error = Some(error);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| crate::error::UpdateError::Network {
            url: url.clone(),
            reason: "download failed without a recorded error".to_string(),
        });
        queue.push(DownloadEvent::PackageFailed {
            module,
            entry,
            error,
        });
    });
}
