//! Per-module download state.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::fetch::PackageFetcher;
use crate::layout;
use crate::manifest::PatchEntry;

use super::events::EventQueue;
use super::worker::spawn_package_worker;

/// Download bookkeeping for one module's pending update.
///
/// Owns the pending package queue and byte counters. Only the
/// controlling thread mutates this; workers report through the event
/// queue and the controller calls the `on_*` methods while draining it.
pub struct ModuleDownload {
    module: String,
    base_url: String,
    dest_dir: PathBuf,
    pending: VecDeque<PatchEntry>,
    in_flight: usize,
    allotted: usize,
    downloaded_bytes: u64,
    total_bytes: u64,
    completed: Vec<PatchEntry>,
    failed: Vec<PatchEntry>,
}

impl ModuleDownload {
    pub fn new(module: impl Into<String>, base_url: impl Into<String>, dest_dir: PathBuf) -> Self {
        Self {
            module: module.into(),
            base_url: base_url.into(),
            dest_dir,
            pending: VecDeque::new(),
            in_flight: 0,
            allotted: 0,
            downloaded_bytes: 0,
            total_bytes: 0,
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Queue entries for download.
    ///
    /// Configuration packages jump the queue: game code typically needs
    /// table data before the assets it describes, so anything tagged as
    /// a config package downloads first.
    pub fn enqueue(&mut self, entries: Vec<PatchEntry>) {
        for entry in entries {
            self.total_bytes += (entry.size_kb * 1024.0) as u64;
            if layout::is_config_package(&entry.package_name) {
                self.pending.push_front(entry);
            } else {
                self.pending.push_back(entry);
            }
        }
    }

    /// Set how many worker threads this module may occupy.
    pub fn set_allotment(&mut self, allotted: usize) {
        self.allotted = allotted;
    }

    /// Worker threads this module may currently occupy.
    pub fn allotted(&self) -> usize {
        self.allotted
    }

    /// Spawn workers until the allotment is filled or the queue empties.
    ///
    /// Returns the number of workers started.
    pub fn spawn_ready(
        &mut self,
        queue: &EventQueue,
        fetcher: &Arc<dyn PackageFetcher>,
        max_attempts: u32,
    ) -> usize {
        let mut spawned = 0;
        while self.in_flight < self.allotted {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };

            let url = layout::package_endpoint(&self.base_url, &entry.package_name);
            let dest = self.dest_dir.join(&entry.package_name);
            debug!(
                module = %self.module,
                package = %entry.package_name,
                "starting package download"
            );

            spawn_package_worker(
                queue.clone(),
                Arc::clone(fetcher),
                self.module.clone(),
                entry,
                url,
                dest,
                max_attempts,
            );
            self.in_flight += 1;
            spawned += 1;
        }
        spawned
    }

    pub fn on_progress(&mut self, bytes: u64) {
        self.downloaded_bytes += bytes;
    }

    pub fn on_progress_discarded(&mut self, bytes: u64) {
        self.downloaded_bytes = self.downloaded_bytes.saturating_sub(bytes);
    }

    pub fn on_completed(&mut self, entry: PatchEntry) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.completed.push(entry);
    }

    pub fn on_failed(&mut self, entry: PatchEntry) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.failed.push(entry);
    }

    /// True once every queued package has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failures(&self) -> &[PatchEntry] {
        &self.failed
    }

    pub fn completed(&self) -> &[PatchEntry] {
        &self.completed
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    #[cfg(test)]
    fn pending_names(&self) -> Vec<&str> {
        self.pending.iter().map(|e| e.package_name.as_str()).collect()
    }
}
