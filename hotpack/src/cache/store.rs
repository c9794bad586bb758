//! Refcounted package loading and unloading.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};
use crate::layout;

use super::index::{PackageDescriptor, PackageIndex};

/// An opened package archive.
#[derive(Debug)]
pub struct PackageHandle {
    package_name: String,
    path: PathBuf,
}

impl PackageHandle {
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Resolved on-disk location this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the archive's raw bytes.
    pub fn read(&self) -> UpdateResult<Vec<u8>> {
        fs::read(&self.path).map_err(|source| UpdateError::ReadFailed {
            path: self.path.clone(),
            source,
        })
    }
}

struct CacheEntry {
    handle: PackageHandle,
    ref_count: u32,
}

/// Reference-counted registry of one module's loaded packages.
///
/// Loads resolve the full dependency chain: loading an asset loads its
/// package plus every transitive dependency, incrementing each visited
/// package's count once per visit. Releasing walks the same chain in
/// reverse, and any package reaching zero is physically unloaded and
/// evicted immediately.
pub struct PackageCache {
    module: String,
    hot_dir: PathBuf,
    unpack_dir: PathBuf,
    index: PackageIndex,
    dependencies: HashMap<String, Vec<String>>,
    entries: HashMap<String, CacheEntry>,
}

impl PackageCache {
    /// Build a cache over an already parsed index.
    pub fn new(config: &UpdateConfig, module: impl Into<String>, index: PackageIndex) -> Self {
        let module = module.into();

        // Dependency edges are per package, so fold the per-asset
        // records down to one deduplicated list per package name.
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for descriptor in index.descriptors() {
            let deps = dependencies
                .entry(descriptor.package_name.clone())
                .or_default();
            for dep in &descriptor.dependencies {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
        }

        Self {
            hot_dir: layout::hot_dir(&config.data_dir, &module),
            unpack_dir: layout::unpack_dir(&config.data_dir, &module),
            module,
            index,
            dependencies,
            entries: HashMap::new(),
        }
    }

    /// Open a module's cache by reading its config package index.
    ///
    /// A missing config package is fail-soft: the cache opens with an
    /// empty index and every load reports not-found, so a caller can
    /// proceed with whatever else is locally present.
    pub fn open(config: &UpdateConfig, module: impl Into<String>) -> UpdateResult<Self> {
        let module = module.into();
        let config_name = layout::config_package_name(&module);

        let index = match resolve_existing(
            &layout::hot_dir(&config.data_dir, &module),
            &layout::unpack_dir(&config.data_dir, &module),
            &config_name,
        ) {
            Some(path) => PackageIndex::load(module.clone(), &path)?,
            None => {
                warn!(module = %module, "no config package found, cache opens empty");
                PackageIndex::from_records(module.clone(), Vec::new())
            }
        };

        Ok(Self::new(config, module, index))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    /// Load the package chain backing a logical asset path.
    pub fn load_by_path(&mut self, asset_path: &str) -> UpdateResult<PackageDescriptor> {
        self.load(super::index::path_fingerprint(asset_path))
    }

    /// Load the package chain backing a fingerprint.
    ///
    /// The returned descriptor is a snapshot; package handles stay
    /// owned by the cache and are reachable via [`handle`].
    ///
    /// [`handle`]: PackageCache::handle
    pub fn load(&mut self, fingerprint: u64) -> UpdateResult<PackageDescriptor> {
        let descriptor = self
            .index
            .descriptor(fingerprint)
            .cloned()
            .ok_or(UpdateError::PackageNotFound { fingerprint })?;

        let order = self.visit_order(&descriptor.package_name)?;
        let mut acquired = 0;
        for name in &order {
            if let Err(error) = self.acquire(name) {
                // Roll the partial chain back so counts stay balanced.
                for done in order[..acquired].iter().rev() {
                    self.release_one(done);
                }
                return Err(error);
            }
            acquired += 1;
        }

        Ok(descriptor)
    }

    /// Release one prior load of the asset behind a fingerprint.
    ///
    /// Walks the same dependency chain the load walked, in reverse,
    /// and returns the names of packages that reached zero and were
    /// unloaded. Releasing something that was never loaded is a
    /// consistency error and changes nothing.
    pub fn release(&mut self, fingerprint: u64) -> UpdateResult<Vec<String>> {
        let descriptor = self
            .index
            .descriptor(fingerprint)
            .cloned()
            .ok_or(UpdateError::PackageNotFound { fingerprint })?;

        if !self.entries.contains_key(&descriptor.package_name) {
            return Err(UpdateError::CacheConsistency(format!(
                "release of untracked package {}",
                descriptor.package_name
            )));
        }

        let order = self.visit_order(&descriptor.package_name)?;
        let mut unloaded = Vec::new();
        for name in order.iter().rev() {
            if let Some(evicted) = self.release_one(name) {
                unloaded.push(evicted);
            }
        }
        Ok(unloaded)
    }

    /// Drop every loaded package regardless of reference counts.
    ///
    /// Intended for scene teardown, where the caller knows nothing
    /// will touch the handles again.
    pub fn clear(&mut self) -> Vec<String> {
        let names: Vec<String> = self.entries.keys().cloned().collect();
        self.entries.clear();
        debug!(module = %self.module, count = names.len(), "cache cleared");
        names
    }

    /// Current reference count for a package, if loaded.
    pub fn reference_count(&self, package_name: &str) -> Option<u32> {
        self.entries.get(package_name).map(|e| e.ref_count)
    }

    pub fn is_loaded(&self, package_name: &str) -> bool {
        self.entries.contains_key(package_name)
    }

    /// Handle for a loaded package.
    pub fn handle(&self, package_name: &str) -> Option<&PackageHandle> {
        self.entries.get(package_name).map(|e| &e.handle)
    }

    pub fn loaded_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether a hot-updated copy of a package exists on disk.
    pub fn has_hot_copy(&self, package_name: &str) -> bool {
        self.hot_dir.join(package_name).exists()
    }

    /// Dependency-first visitation order for a package's chain.
    ///
    /// Shared dependencies appear once per path that reaches them, so
    /// acquire and release stay symmetric. A dependency cycle in the
    /// index is reported rather than recursed into.
    fn visit_order(&self, root: &str) -> UpdateResult<Vec<String>> {
        let mut order = Vec::new();
        let mut trail = Vec::new();
        self.walk(root, &mut trail, &mut order)?;
        Ok(order)
    }

    fn walk(
        &self,
        package: &str,
        trail: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> UpdateResult<()> {
        if trail.iter().any(|p| p == package) {
            return Err(UpdateError::CacheConsistency(format!(
                "dependency cycle in module {}: {} -> {}",
                self.module,
                trail.join(" -> "),
                package
            )));
        }

        trail.push(package.to_string());
        if let Some(deps) = self.dependencies.get(package) {
            for dep in deps {
                self.walk(dep, trail, order)?;
            }
        }
        trail.pop();

        order.push(package.to_string());
        Ok(())
    }

    fn acquire(&mut self, package_name: &str) -> UpdateResult<()> {
        if let Some(entry) = self.entries.get_mut(package_name) {
            entry.ref_count += 1;
            return Ok(());
        }

        let path = resolve_existing(&self.hot_dir, &self.unpack_dir, package_name)
            .ok_or_else(|| UpdateError::ReadFailed {
                path: self.hot_dir.join(package_name),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    "package absent from hot and unpacked locations",
                ),
            })?;

        debug!(module = %self.module, package = %package_name, path = %path.display(), "package loaded");
        self.entries.insert(
            package_name.to_string(),
            CacheEntry {
                handle: PackageHandle {
                    package_name: package_name.to_string(),
                    path,
                },
                ref_count: 1,
            },
        );
        Ok(())
    }

    /// Decrement one count; returns the name if the entry was evicted.
    fn release_one(&mut self, package_name: &str) -> Option<String> {
        let Some(entry) = self.entries.get_mut(package_name) else {
            warn!(module = %self.module, package = %package_name, "release of untracked dependency ignored");
            return None;
        };

        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            self.entries.remove(package_name);
            debug!(module = %self.module, package = %package_name, "package unloaded");
            return Some(package_name.to_string());
        }
        None
    }
}

/// Prefer the hot-updated copy, fall back to the unpacked embedded one.
fn resolve_existing(hot_dir: &Path, unpack_dir: &Path, file_name: &str) -> Option<PathBuf> {
    let hot = hot_dir.join(file_name);
    if hot.exists() {
        return Some(hot);
    }
    let unpacked = unpack_dir.join(file_name);
    if unpacked.exists() {
        return Some(unpacked);
    }
    None
}
