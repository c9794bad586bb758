//! Per-module update session state.

use std::collections::HashSet;
use std::path::Path;

use crate::download::ModuleDownload;
use crate::error::UpdateResult;
use crate::fetch::calculate_file_checksum;
use crate::manifest::{Manifest, ManifestStore, PatchEntry};

/// Where a module currently sits in its update lifecycle.
///
/// Modules not tracked by the coordinator are implicitly idle; a
/// session exists only between the version check starting and the
/// update reaching a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Manifest fetch is in flight on a background thread.
    CheckingVersion,
    /// Deferred by admission control; parked on the wait queue.
    Waiting,
    /// Packages are transferring.
    Downloading,
}

/// What kind of outcome the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionKind {
    /// Read-only staleness probe; never starts a transfer.
    Probe,
    /// Full update run.
    Update,
}

/// One module's in-flight update.
pub(crate) struct UpdateSession {
    pub kind: SessionKind,
    pub phase: SessionPhase,
    pub validate_version: bool,
    pub store: ManifestStore,
    pub server: Option<Manifest>,
    pub needed: Vec<PatchEntry>,
    pub download: Option<ModuleDownload>,
}

impl UpdateSession {
    pub fn new(kind: SessionKind, validate_version: bool, store: ManifestStore) -> Self {
        Self {
            kind,
            phase: SessionPhase::CheckingVersion,
            validate_version,
            store,
            server: None,
            needed: Vec::new(),
            download: None,
        }
    }

    /// Sum of the needed entries' sizes in MB.
    pub fn needed_mb(&self) -> f64 {
        self.needed.iter().map(|e| e.size_kb).sum::<f64>() / 1024.0
    }
}

/// Server entries whose local file is absent or fails its hash check.
///
/// This is the authoritative "what do we still need" computation: it
/// looks at the files themselves rather than the local manifest, so
/// entries that failed in a previous cycle (and were left out of the
/// committed manifest) show up as needed again.
pub(crate) fn needed_entries(server: &Manifest, dir: &Path) -> UpdateResult<Vec<PatchEntry>> {
    let Some(patch) = server.current_patch() else {
        return Ok(Vec::new());
    };

    let mut needed = Vec::new();
    for entry in &patch.entries {
        let path = dir.join(&entry.package_name);
        if !path.exists() {
            needed.push(entry.clone());
            continue;
        }
        if calculate_file_checksum(&path)? != entry.content_hash {
            needed.push(entry.clone());
        }
    }
    Ok(needed)
}

/// Copy of `server` with the named entries removed from its last patch.
///
/// Used when committing after a partially failed run: failed entries
/// are left out of the local manifest so the files they describe stay
/// detectably missing and get retried on the next cycle.
pub(crate) fn manifest_without(server: &Manifest, excluded: &HashSet<String>) -> Manifest {
    let mut committed = server.clone();
    if let Some(patch) = committed.patches.last_mut() {
        patch.entries.retain(|e| !excluded.contains(&e.package_name));
    }
    committed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Patch;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    fn hashed_entry(name: &str, payload: &[u8]) -> PatchEntry {
        PatchEntry {
            package_name: name.to_string(),
            content_hash: format!("{:x}", Sha256::digest(payload)),
            size_kb: payload.len() as f64 / 1024.0,
        }
    }

    fn server_with(entries: Vec<PatchEntry>) -> Manifest {
        Manifest {
            download_base_url: "http://cdn".to_string(),
            patches: vec![Patch { version: 1, entries }],
        }
    }

    #[test]
    fn test_needed_skips_valid_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("ok.bd"), b"good").unwrap();

        let server = server_with(vec![hashed_entry("ok.bd", b"good")]);
        let needed = needed_entries(&server, temp.path()).unwrap();
        assert!(needed.is_empty());
    }

    #[test]
    fn test_needed_detects_missing_and_corrupt() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("corrupt.bd"), b"wrong bytes").unwrap();

        let server = server_with(vec![
            hashed_entry("missing.bd", b"never written"),
            hashed_entry("corrupt.bd", b"expected bytes"),
        ]);
        let needed = needed_entries(&server, temp.path()).unwrap();
        let names: Vec<&str> = needed.iter().map(|e| e.package_name.as_str()).collect();
        assert_eq!(names, vec!["missing.bd", "corrupt.bd"]);
    }

    #[test]
    fn test_needed_with_no_patches_is_empty() {
        let temp = TempDir::new().unwrap();
        let server = Manifest {
            download_base_url: "http://cdn".to_string(),
            patches: vec![],
        };
        assert!(needed_entries(&server, temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_manifest_without_drops_failed_entries() {
        let server = server_with(vec![
            hashed_entry("keep.bd", b"a"),
            hashed_entry("drop.bd", b"b"),
        ]);
        let excluded: HashSet<String> = ["drop.bd".to_string()].into();

        let committed = manifest_without(&server, &excluded);
        let names: Vec<&str> = committed.patches[0]
            .entries
            .iter()
            .map(|e| e.package_name.as_str())
            .collect();
        assert_eq!(names, vec!["keep.bd"]);
        // Version is preserved so a later full success looks identical.
        assert_eq!(committed.current_version(), Some(1));
    }
}
