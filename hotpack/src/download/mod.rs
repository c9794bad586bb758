//! Multi-threaded package downloading.
//!
//! Worker threads perform blocking transfers and report back through a
//! shared [`EventQueue`]; all bookkeeping happens on the controlling
//! thread when the queue is drained. Workers never touch scheduler
//! state directly, so no download state needs locking beyond the queue
//! itself.

mod events;
mod scheduler;
mod worker;

pub use events::{DownloadEvent, EventQueue};
pub use scheduler::ModuleDownload;
pub use worker::{spawn_manifest_worker, spawn_package_worker};
