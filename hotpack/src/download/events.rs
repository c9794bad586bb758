//! Worker-to-controller event passing.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::UpdateError;
use crate::manifest::{Manifest, PatchEntry};

/// An event produced on a worker thread.
///
/// Events carry owned data only; the controlling thread applies their
/// side effects when it drains the queue.
#[derive(Debug)]
pub enum DownloadEvent {
    /// Bytes arrived for a package belonging to `module`.
    Progress { module: String, bytes: u64 },

    /// A failed attempt's partial bytes should be subtracted again.
    ProgressDiscarded { module: String, bytes: u64 },

    /// A package downloaded and verified successfully.
    PackageCompleted { module: String, entry: PatchEntry },

    /// A package exhausted its retry budget.
    PackageFailed {
        module: String,
        entry: PatchEntry,
        error: UpdateError,
    },

    /// A background manifest fetch finished.
    ManifestFetched {
        module: String,
        result: Result<Manifest, UpdateError>,
    },
}

/// FIFO queue shared between worker threads and the controlling thread.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<DownloadEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Called from worker threads.
    pub fn push(&self, event: DownloadEvent) {
        self.inner.lock().push_back(event);
    }

    /// Take all queued events in arrival order.
    pub fn drain(&self) -> Vec<DownloadEvent> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
