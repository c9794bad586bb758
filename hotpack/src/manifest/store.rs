//! Manifest persistence and comparison.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{UpdateError, UpdateResult};
use crate::layout;

use super::Manifest;

/// Loads, compares, and commits manifests for one module.
///
/// Two manifest files live side by side in the module's hot directory:
/// the server snapshot (last fetched state) and the local manifest
/// (last fully applied state). The local file is only ever replaced by
/// an atomic rename, so a crash mid-update leaves the previous local
/// manifest intact and the next cycle re-detects the stale entries.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    module: String,
    dir: PathBuf,
}

impl ManifestStore {
    /// Create a store rooted at the module's hot directory.
    pub fn new(data_dir: &Path, module: impl Into<String>) -> Self {
        let module = module.into();
        let dir = layout::hot_dir(data_dir, &module);
        Self { module, dir }
    }

    /// Directory holding both manifest files and downloaded packages.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the committed local manifest.
    pub fn local_path(&self) -> PathBuf {
        layout::local_manifest_path(&self.dir, &self.module)
    }

    /// Path of the last fetched server snapshot.
    pub fn server_path(&self) -> PathBuf {
        layout::server_manifest_path(&self.dir, &self.module)
    }

    /// Load the committed local manifest, if one exists.
    pub fn load_local(&self) -> UpdateResult<Option<Manifest>> {
        read_manifest(&self.local_path())
    }

    /// Load the last fetched server snapshot, if one exists.
    pub fn load_server(&self) -> UpdateResult<Option<Manifest>> {
        read_manifest(&self.server_path())
    }

    /// Persist a freshly fetched server snapshot.
    ///
    /// The snapshot is informational only; correctness rests on the
    /// local manifest, so a plain overwrite is fine here.
    pub fn save_server(&self, manifest: &Manifest) -> UpdateResult<()> {
        let path = self.server_path();
        ensure_parent(&path)?;

        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| UpdateError::Configuration(format!("serialize manifest: {e}")))?;
        fs::write(&path, json).map_err(|source| UpdateError::WriteFailed { path, source })?;
        Ok(())
    }

    /// Commit a server manifest as the new local manifest.
    ///
    /// Writes to a temp file in the same directory and renames it onto
    /// the local path, so the local manifest is replaced atomically.
    pub fn commit(&self, manifest: &Manifest) -> UpdateResult<()> {
        let path = self.local_path();
        ensure_parent(&path)?;

        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| UpdateError::Configuration(format!("serialize manifest: {e}")))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(|source| UpdateError::WriteFailed {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &path)
            .map_err(|source| UpdateError::WriteFailed { path, source })?;
        Ok(())
    }

    /// Whether the local manifest is stale relative to the server's.
    ///
    /// Stale when there is no local manifest at all, when the local
    /// patch list is empty while the server's is not, or when the
    /// current patch versions differ. Versions compare by inequality
    /// only, so a server rollback is also treated as stale.
    pub fn is_stale(local: Option<&Manifest>, server: &Manifest) -> bool {
        let Some(local) = local else {
            return server.current_patch().is_some();
        };

        match (local.current_version(), server.current_version()) {
            (None, None) => false,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(local_version), Some(server_version)) => local_version != server_version,
        }
    }
}

fn ensure_parent(path: &Path) -> UpdateResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| UpdateError::CreateDirFailed {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn read_manifest(path: &Path) -> UpdateResult<Option<Manifest>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|source| UpdateError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = serde_json::from_str(&content)
        .map_err(|e| UpdateError::Configuration(format!("parse {}: {e}", path.display())))?;
    Ok(Some(manifest))
}
