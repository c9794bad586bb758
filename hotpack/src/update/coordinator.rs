//! Cross-module update coordination.
//!
//! The coordinator owns every module's session, the process-wide
//! worker budget, and the tick loop. All public methods must be called
//! from one controlling thread; background workers only ever talk to
//! the coordinator through the event queue it drains in [`tick`].
//!
//! [`tick`]: UpdateCoordinator::tick

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{HotUpdateMode, UpdateConfig};
use crate::download::{spawn_manifest_worker, DownloadEvent, EventQueue, ModuleDownload};
use crate::error::{UpdateError, UpdateResult};
use crate::fetch::{HttpFetcher, ManifestFetcher, PackageFetcher};
use crate::layout;
use crate::manifest::{Manifest, ManifestStore};

use super::session::{manifest_without, needed_entries, SessionKind, SessionPhase, UpdateSession};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Controlling-thread notification produced by [`UpdateCoordinator::tick`].
#[derive(Debug)]
pub enum UpdateNotification {
    /// A module's download was admitted and is starting.
    Started { module: String, total_mb: f64 },

    /// Admission control parked the module behind active downloads.
    Waiting { module: String },

    /// Byte counters moved for a downloading module.
    Progress {
        module: String,
        downloaded_mb: f64,
        total_mb: f64,
    },

    /// One package finished downloading and verified.
    PackageCompleted { module: String, package: String },

    /// One package exhausted its retries. The session continues.
    PackageFailed {
        module: String,
        package: String,
        error: UpdateError,
    },

    /// The module needs nothing; local state already matches.
    UpToDate { module: String },

    /// The module's queue fully drained. Fires exactly once per run.
    Completed {
        module: String,
        failed_packages: usize,
    },

    /// The version check itself failed before any transfer started.
    CheckFailed { module: String, error: UpdateError },

    /// Result of a read-only version probe.
    ValidateResult {
        module: String,
        need_update: bool,
        size_mb: f64,
    },
}

/// Drives hot updates for any number of modules.
pub struct UpdateCoordinator {
    config: UpdateConfig,
    queue: EventQueue,
    manifest_fetcher: Arc<dyn ManifestFetcher>,
    package_fetcher: Arc<dyn PackageFetcher>,
    sessions: HashMap<String, UpdateSession>,
    /// Modules currently holding workers, in start order. The last
    /// element is the most recently started and takes the ceiling
    /// share when the thread budget does not divide evenly.
    downloading: Vec<String>,
    waiting: VecDeque<String>,
    pending: Vec<UpdateNotification>,
}

impl UpdateCoordinator {
    /// Create a coordinator with explicit fetcher implementations.
    pub fn new(
        config: UpdateConfig,
        manifest_fetcher: Arc<dyn ManifestFetcher>,
        package_fetcher: Arc<dyn PackageFetcher>,
    ) -> Self {
        Self {
            config,
            queue: EventQueue::new(),
            manifest_fetcher,
            package_fetcher,
            sessions: HashMap::new(),
            downloading: Vec::new(),
            waiting: VecDeque::new(),
            pending: Vec::new(),
        }
    }

    /// Create a coordinator backed by the production HTTP fetcher.
    pub fn with_http(config: UpdateConfig) -> UpdateResult<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.manifest_timeout)?);
        Ok(Self::new(config, fetcher.clone(), fetcher))
    }

    /// Begin an update for a module.
    ///
    /// In embedded-only mode the module finishes immediately with no
    /// network traffic. Returns `false` if the module already has a
    /// session in flight.
    pub fn request_update(&mut self, module: &str, validate_version: bool) -> bool {
        let module = module.to_lowercase();
        if self.sessions.contains_key(&module) {
            warn!(module = %module, "update requested while a session is active");
            return false;
        }

        if self.config.mode == HotUpdateMode::Embedded {
            debug!(module = %module, "embedded-only mode, nothing to update");
            self.pending.push(UpdateNotification::UpToDate { module });
            return true;
        }

        self.begin_session(module, SessionKind::Update, validate_version);
        true
    }

    /// Probe whether a module is stale, without starting any transfer.
    ///
    /// The answer arrives as a [`UpdateNotification::ValidateResult`]
    /// on a later tick. Returns `false` if a session is already active.
    pub fn validate_assets(&mut self, module: &str) -> bool {
        let module = module.to_lowercase();
        if self.sessions.contains_key(&module) {
            return false;
        }

        self.begin_session(module, SessionKind::Probe, true);
        true
    }

    /// Current lifecycle phase for a module, if a session exists.
    pub fn module_phase(&self, module: &str) -> Option<SessionPhase> {
        self.sessions.get(&module.to_lowercase()).map(|s| s.phase)
    }

    /// True when no session remains in any phase.
    pub fn is_idle(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drain worker events and return the resulting notifications.
    ///
    /// Must be called from the controlling thread; this is the only
    /// place session and scheduler state mutates, so every callback a
    /// caller observes happens in FIFO event order on one thread.
    pub fn tick(&mut self) -> Vec<UpdateNotification> {
        let mut out = std::mem::take(&mut self.pending);

        for event in self.queue.drain() {
            match event {
                DownloadEvent::ManifestFetched { module, result } => {
                    self.on_manifest(module, result, &mut out);
                }
                DownloadEvent::Progress { module, bytes } => {
                    self.on_progress(&module, bytes, false, &mut out);
                }
                DownloadEvent::ProgressDiscarded { module, bytes } => {
                    self.on_progress(&module, bytes, true, &mut out);
                }
                DownloadEvent::PackageCompleted { module, entry } => {
                    let finished = match self.downloading_session(&module) {
                        Some(dl) => {
                            out.push(UpdateNotification::PackageCompleted {
                                module: module.clone(),
                                package: entry.package_name.clone(),
                            });
                            dl.on_completed(entry);
                            dl.is_finished()
                        }
                        None => false,
                    };
                    if finished {
                        self.finish_module(&module, &mut out);
                    }
                }
                DownloadEvent::PackageFailed {
                    module,
                    entry,
                    error,
                } => {
                    let finished = match self.downloading_session(&module) {
                        Some(dl) => {
                            dl.on_failed(entry.clone());
                            out.push(UpdateNotification::PackageFailed {
                                module: module.clone(),
                                package: entry.package_name,
                                error,
                            });
                            dl.is_finished()
                        }
                        None => false,
                    };
                    if finished {
                        self.finish_module(&module, &mut out);
                    }
                }
            }
        }

        self.rebalance_and_spawn();
        out
    }

    // === Session lifecycle ===

    fn begin_session(&mut self, module: String, kind: SessionKind, validate_version: bool) {
        let store = ManifestStore::new(&self.config.data_dir, module.clone());
        let session = UpdateSession::new(kind, validate_version, store);
        self.sessions.insert(module.clone(), session);

        let url = layout::manifest_endpoint(&self.config.download_base_url, &module);
        info!(module = %module, url = %url, "checking module version");
        spawn_manifest_worker(
            self.queue.clone(),
            Arc::clone(&self.manifest_fetcher),
            module,
            url,
        );
    }

    fn on_manifest(
        &mut self,
        module: String,
        result: Result<Manifest, UpdateError>,
        out: &mut Vec<UpdateNotification>,
    ) {
        if !self.sessions.contains_key(&module) {
            return;
        }

        let server = match result {
            Ok(server) => server,
            Err(error) => {
                warn!(module = %module, %error, "manifest fetch failed");
                self.sessions.remove(&module);
                out.push(UpdateNotification::CheckFailed { module, error });
                return;
            }
        };

        match self.evaluate(&module, server) {
            Ok(()) => {}
            Err(error) => {
                warn!(module = %module, %error, "version check failed");
                self.sessions.remove(&module);
                out.push(UpdateNotification::CheckFailed { module, error });
                return;
            }
        }

        self.decide(&module, out);
    }

    /// Persist the snapshot and compute staleness plus the need-list.
    fn evaluate(&mut self, module: &str, server: Manifest) -> UpdateResult<()> {
        let session = self
            .sessions
            .get_mut(module)
            .ok_or_else(|| UpdateError::Configuration(format!("no session for {module}")))?;

        // The snapshot is advisory; failing to save it should not fail
        // the update itself.
        if let Err(error) = session.store.save_server(&server) {
            warn!(module = %module, %error, "failed to save server manifest snapshot");
        }

        session.needed = needed_entries(&server, session.store.dir())?;
        session.server = Some(server);
        Ok(())
    }

    fn decide(&mut self, module: &str, out: &mut Vec<UpdateNotification>) {
        let Some(session) = self.sessions.get_mut(module) else {
            return;
        };
        let Some(server) = session.server.as_ref() else {
            return;
        };

        let stale = session.validate_version
            && ManifestStore::is_stale(
                match session.store.load_local() {
                    Ok(local) => local,
                    Err(error) => {
                        warn!(module = %module, %error, "failed to load local manifest");
                        None
                    }
                }
                .as_ref(),
                server,
            );
        let need_update = stale || !session.needed.is_empty();
        let size_mb = session.needed_mb();

        if session.kind == SessionKind::Probe {
            debug!(module = %module, need_update, size_mb, "version probe finished");
            self.sessions.remove(module);
            out.push(UpdateNotification::ValidateResult {
                module: module.to_string(),
                need_update,
                size_mb,
            });
            return;
        }

        if !need_update {
            info!(module = %module, "module is up to date");
            self.sessions.remove(module);
            out.push(UpdateNotification::UpToDate {
                module: module.to_string(),
            });
            return;
        }

        if session.needed.is_empty() {
            // Version moved but every file already matches; adopt the
            // new manifest without transferring anything.
            let server = server.clone();
            let result = session.store.commit(&server);
            self.sessions.remove(module);
            match result {
                Ok(()) => {
                    info!(module = %module, "adopted new manifest, no files needed");
                    out.push(UpdateNotification::UpToDate {
                        module: module.to_string(),
                    });
                }
                Err(error) => out.push(UpdateNotification::CheckFailed {
                    module: module.to_string(),
                    error,
                }),
            }
            return;
        }

        if self.downloading.len() >= self.config.max_download_threads {
            info!(module = %module, "deferred by admission control");
            session.phase = SessionPhase::Waiting;
            self.waiting.push_back(module.to_string());
            out.push(UpdateNotification::Waiting {
                module: module.to_string(),
            });
            return;
        }

        self.start_download(module, out);
    }

    fn start_download(&mut self, module: &str, out: &mut Vec<UpdateNotification>) {
        let Some(session) = self.sessions.get_mut(module) else {
            return;
        };

        let base_url = session
            .server
            .as_ref()
            .map(|m| m.download_base_url.clone())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.config.download_base_url.clone());

        let total_mb = session.needed_mb();
        let mut download =
            ModuleDownload::new(module, base_url, session.store.dir().to_path_buf());
        download.enqueue(std::mem::take(&mut session.needed));

        session.download = Some(download);
        session.phase = SessionPhase::Downloading;
        self.downloading.push(module.to_string());

        info!(module = %module, total_mb, "starting module download");
        out.push(UpdateNotification::Started {
            module: module.to_string(),
            total_mb,
        });
    }

    fn finish_module(&mut self, module: &str, out: &mut Vec<UpdateNotification>) {
        let Some(mut session) = self.sessions.remove(module) else {
            return;
        };
        self.downloading.retain(|m| m != module);

        let failed: HashSet<String> = session
            .download
            .take()
            .map(|dl| {
                dl.failures()
                    .iter()
                    .map(|entry| entry.package_name.clone())
                    .collect()
            })
            .unwrap_or_default();

        // Commit the server manifest minus failed entries. Their files
        // stay missing on disk, so the next cycle picks them up again.
        if let Some(server) = session.server.as_ref() {
            let committed = manifest_without(server, &failed);
            if let Err(commit_error) = session.store.commit(&committed) {
                error!(module = %module, %commit_error, "failed to commit local manifest");
            }
        }

        info!(
            module = %module,
            failed_packages = failed.len(),
            "module update finished"
        );
        out.push(UpdateNotification::Completed {
            module: module.to_string(),
            failed_packages: failed.len(),
        });

        self.admit_waiting(out);
    }

    fn admit_waiting(&mut self, out: &mut Vec<UpdateNotification>) {
        while self.downloading.len() < self.config.max_download_threads {
            let Some(module) = self.waiting.pop_front() else {
                break;
            };
            self.start_download(&module, out);
        }
    }

    // === Thread balancing ===

    /// Recompute per-module worker allotments and top up workers.
    ///
    /// Each downloading module gets `floor(budget / active)` workers;
    /// when that division is non-integral the most recently started
    /// module gets the ceiling instead.
    fn rebalance_and_spawn(&mut self) {
        let active = self.downloading.len();
        if active == 0 {
            return;
        }

        let budget = self.config.max_download_threads;
        let floor = budget / active;
        let ceiling = budget.div_ceil(active);

        for (i, name) in self.downloading.iter().enumerate() {
            let allotment = if i + 1 == active { ceiling } else { floor };
            if let Some(download) = self
                .sessions
                .get_mut(name)
                .and_then(|s| s.download.as_mut())
            {
                download.set_allotment(allotment);
                download.spawn_ready(&self.queue, &self.package_fetcher, self.config.max_attempts);
            }
        }
    }

    fn downloading_session(&mut self, module: &str) -> Option<&mut ModuleDownload> {
        self.sessions.get_mut(module).and_then(|s| s.download.as_mut())
    }

    fn on_progress(
        &mut self,
        module: &str,
        bytes: u64,
        discarded: bool,
        out: &mut Vec<UpdateNotification>,
    ) {
        let Some(download) = self.downloading_session(module) else {
            return;
        };
        if discarded {
            download.on_progress_discarded(bytes);
        } else {
            download.on_progress(bytes);
        }
        out.push(UpdateNotification::Progress {
            module: module.to_string(),
            downloaded_mb: download.downloaded_bytes() as f64 / BYTES_PER_MB,
            total_mb: download.total_bytes() as f64 / BYTES_PER_MB,
        });
    }

    /// Worker threads currently allotted to a downloading module.
    pub fn allotment(&self, module: &str) -> Option<usize> {
        self.sessions
            .get(&module.to_lowercase())
            .and_then(|s| s.download.as_ref())
            .map(|dl| dl.allotted())
    }
}
