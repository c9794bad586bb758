//! Versioned patch manifests.
//!
//! A [`Manifest`] lists one [`Patch`] per published version; the last
//! patch is authoritative for current state. Manifests are replaced
//! wholesale after a successful update cycle, never merged field by
//! field.

mod store;

pub use store::ManifestStore;

use serde::{Deserialize, Serialize};

/// Versioned list of package entries for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Base URL packages in this manifest are downloaded from.
    pub download_base_url: String,

    /// Published patches, ordered by ascending version.
    pub patches: Vec<Patch>,
}

/// One version's worth of manifest entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Patch version. Compared by equality only; monotonic increase is
    /// the publisher's contract.
    pub version: u32,

    /// Package entries current at this version.
    pub entries: Vec<PatchEntry>,
}

/// One package's manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEntry {
    /// Package file name, e.g. `characters.bd`.
    pub package_name: String,

    /// Hex content hash of the package file.
    pub content_hash: String,

    /// Package size in KiB.
    pub size_kb: f64,
}

impl Manifest {
    /// The authoritative patch for current state, if any.
    pub fn current_patch(&self) -> Option<&Patch> {
        self.patches.last()
    }

    /// Version of the current patch, if any.
    pub fn current_version(&self) -> Option<u32> {
        self.current_patch().map(|p| p.version)
    }
}
