//! Resource loading facade.
//!
//! Wraps a module's [`PackageCache`] with the API game code actually
//! calls: load an object by logical path, stamp out instances, and
//! hand them back. Released instances are pooled per fingerprint for
//! reuse; destroying the last pooled instance releases the backing
//! package reference.
//!
//! Loads requested before the module's config package has arrived are
//! deferred rather than failed; the runtime resolves them once the
//! index is available, which is the normal path for a freshly updated
//! module.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{PackageCache, PackageDescriptor};
use crate::config::UpdateConfig;
use crate::error::{UpdateError, UpdateResult};

/// A loaded resource: descriptor plus the backing archive bytes.
#[derive(Debug, Clone)]
pub struct ResourceObject {
    descriptor: PackageDescriptor,
    data: Arc<Vec<u8>>,
}

impl ResourceObject {
    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    pub fn fingerprint(&self) -> u64 {
        self.descriptor.fingerprint
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// One live instance stamped out from a [`ResourceObject`].
#[derive(Debug)]
pub struct ResourceInstance {
    instance_id: u64,
    fingerprint: u64,
    data: Arc<Vec<u8>>,
}

impl ResourceInstance {
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// What a deferred request should produce once it resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredKind {
    Object,
    Instance,
}

/// Outcome of one deferred request.
#[derive(Debug)]
pub enum DeferredResult {
    /// A deferred [`load_object`] resolved.
    ///
    /// [`load_object`]: ResourceFacade::load_object
    Object(UpdateResult<ResourceObject>),

    /// A deferred [`instantiate`] resolved.
    ///
    /// [`instantiate`]: ResourceFacade::instantiate
    Instance(UpdateResult<ResourceInstance>),
}

/// Loading, instantiation, and pooling for one module.
pub struct ResourceFacade {
    cache: PackageCache,
    pools: HashMap<u64, Vec<ResourceInstance>>,
    deferred: Vec<(String, DeferredKind)>,
    next_instance_id: u64,
}

impl ResourceFacade {
    pub fn new(cache: PackageCache) -> Self {
        Self {
            cache,
            pools: HashMap::new(),
            deferred: Vec::new(),
            next_instance_id: 1,
        }
    }

    /// Open a facade by reading the module's config package.
    pub fn open(config: &UpdateConfig, module: impl Into<String>) -> UpdateResult<Self> {
        Ok(Self::new(PackageCache::open(config, module)?))
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// Whether the module's package index has been parsed yet.
    pub fn has_index(&self) -> bool {
        !self.cache.index().is_empty()
    }

    /// Load an object synchronously.
    ///
    /// Increments reference counts on the backing package and its
    /// dependency chain; pair with [`release_object`].
    ///
    /// [`release_object`]: ResourceFacade::release_object
    pub fn load_object(&mut self, asset_path: &str) -> UpdateResult<ResourceObject> {
        let descriptor = self.cache.load_by_path(asset_path)?;
        let handle = self
            .cache
            .handle(&descriptor.package_name)
            .ok_or_else(|| {
                UpdateError::CacheConsistency(format!(
                    "loaded package {} has no handle",
                    descriptor.package_name
                ))
            })?;
        let data = Arc::new(handle.read()?);
        Ok(ResourceObject { descriptor, data })
    }

    /// Queue a load to be satisfied once the package index arrives.
    ///
    /// If the index is already present the load still waits for the
    /// next [`resolve_deferred`] call, keeping delivery order stable.
    ///
    /// [`resolve_deferred`]: ResourceFacade::resolve_deferred
    pub fn load_object_deferred(&mut self, asset_path: impl Into<String>) {
        self.deferred.push((asset_path.into(), DeferredKind::Object));
    }

    /// Queue an instantiation to run once the package index arrives.
    ///
    /// Resolves to a ready [`ResourceInstance`]; the backing package
    /// reference is balanced when the instance is destroyed, exactly
    /// as if the caller had loaded and instantiated by hand.
    pub fn instantiate_deferred(&mut self, asset_path: impl Into<String>) {
        self.deferred.push((asset_path.into(), DeferredKind::Instance));
    }

    /// Attempt every deferred request.
    ///
    /// Returns nothing while the index is still missing. A request
    /// whose backing package file has not landed on disk yet stays
    /// queued for a later attempt; anything else resolves now,
    /// successfully or not.
    pub fn resolve_deferred(&mut self) -> Vec<(String, DeferredResult)> {
        if !self.has_index() {
            return Vec::new();
        }

        let requests = std::mem::take(&mut self.deferred);
        let mut resolved = Vec::new();
        for (path, kind) in requests {
            match self.load_object(&path) {
                Err(UpdateError::ReadFailed { .. }) => self.deferred.push((path, kind)),
                Err(error) => {
                    let result = match kind {
                        DeferredKind::Object => DeferredResult::Object(Err(error)),
                        DeferredKind::Instance => DeferredResult::Instance(Err(error)),
                    };
                    resolved.push((path, result));
                }
                Ok(object) => {
                    let result = match kind {
                        DeferredKind::Object => DeferredResult::Object(Ok(object)),
                        DeferredKind::Instance => {
                            let instance = self.instantiate(&object);
                            DeferredResult::Instance(Ok(instance))
                        }
                    };
                    resolved.push((path, result));
                }
            }
        }
        resolved
    }

    /// Number of requests still waiting for the index.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Stamp out an instance, reusing a pooled one when available.
    pub fn instantiate(&mut self, object: &ResourceObject) -> ResourceInstance {
        if let Some(pool) = self.pools.get_mut(&object.fingerprint()) {
            if let Some(instance) = pool.pop() {
                debug!(fingerprint = object.fingerprint(), "instance reused from pool");
                return instance;
            }
        }

        let instance = ResourceInstance {
            instance_id: self.next_instance_id,
            fingerprint: object.fingerprint(),
            data: Arc::clone(&object.data),
        };
        self.next_instance_id += 1;
        instance
    }

    /// Return or destroy an instance.
    ///
    /// With `destroy = false` the instance goes back to its pool and
    /// no cache reference moves. With `destroy = true` the instance is
    /// dropped, and if its pool is empty the backing package reference
    /// is released too.
    pub fn release(&mut self, instance: ResourceInstance, destroy: bool) {
        let fingerprint = instance.fingerprint;

        if !destroy {
            self.pools.entry(fingerprint).or_default().push(instance);
            return;
        }

        drop(instance);
        let pool_empty = self
            .pools
            .get(&fingerprint)
            .map_or(true, |pool| pool.is_empty());
        if pool_empty {
            if let Err(error) = self.cache.release(fingerprint) {
                // Consistency problems are loud but never fatal here.
                warn!(%error, fingerprint, "release after destroy failed");
            }
        }
    }

    /// Release one prior [`load_object`] without touching instances.
    ///
    /// [`load_object`]: ResourceFacade::load_object
    pub fn release_object(&mut self, object: ResourceObject) {
        if let Err(error) = self.cache.release(object.fingerprint()) {
            warn!(%error, fingerprint = object.fingerprint(), "object release failed");
        }
    }

    /// Warm the pool with one ready instance per path.
    pub fn preload(&mut self, asset_paths: &[&str]) -> UpdateResult<()> {
        for path in asset_paths {
            let object = self.load_object(path)?;
            let instance = self.instantiate(&object);
            self.release(instance, false);
        }
        Ok(())
    }

    /// Drop every pool and every cache entry.
    pub fn clear(&mut self) {
        self.pools.clear();
        self.cache.clear();
    }

    /// Re-read the module's index after its config package changed.
    ///
    /// Loaded entries and pools are dropped; callers are expected to
    /// do this at a quiet point such as right after an update finishes.
    pub fn refresh(&mut self, config: &UpdateConfig) -> UpdateResult<()> {
        let module = self.cache.module().to_string();
        if self.cache.loaded_count() > 0 {
            warn!(module = %module, "refreshing index with packages still loaded");
        }
        self.pools.clear();
        self.cache = PackageCache::open(config, module)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{path_fingerprint, IndexRecord, PackageIndex};
    use crate::layout;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _data: TempDir,
        _embedded: TempDir,
        facade: ResourceFacade,
    }

    fn fixture(records: Vec<IndexRecord>, files: &[(&str, &[u8])]) -> Fixture {
        let data = TempDir::new().unwrap();
        let embedded = TempDir::new().unwrap();
        let config = UpdateConfig::new("http://cdn", data.path(), embedded.path());

        let hot_dir = layout::hot_dir(data.path(), "game");
        fs::create_dir_all(&hot_dir).unwrap();
        for (name, payload) in files {
            fs::write(hot_dir.join(name), payload).unwrap();
        }

        let cache = PackageCache::new(&config, "game", PackageIndex::from_records("game", records));
        Fixture {
            _data: data,
            _embedded: embedded,
            facade: ResourceFacade::new(cache),
        }
    }

    fn record(path: &str, package: &str) -> IndexRecord {
        IndexRecord {
            asset_path: path.to_string(),
            package_name: package.to_string(),
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn test_load_object_returns_archive_bytes() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);

        let object = f.facade.load_object("hero").unwrap();
        assert_eq!(object.data(), b"bytes");
        assert_eq!(object.descriptor().asset_entry_name, "hero");

        f.facade.release_object(object);
        assert_eq!(f.facade.cache().loaded_count(), 0);
    }

    #[test]
    fn test_pooled_instance_is_reused() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        let object = f.facade.load_object("hero").unwrap();

        let first = f.facade.instantiate(&object);
        let first_id = first.instance_id();
        f.facade.release(first, false);

        let second = f.facade.instantiate(&object);
        assert_eq!(second.instance_id(), first_id);
    }

    #[test]
    fn test_destroying_last_instance_releases_package() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        let object = f.facade.load_object("hero").unwrap();
        assert!(f.facade.cache().is_loaded("hero.bd"));

        let instance = f.facade.instantiate(&object);
        f.facade.release(instance, true);
        assert!(!f.facade.cache().is_loaded("hero.bd"));
    }

    #[test]
    fn test_pooled_instance_keeps_package_loaded() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        let object = f.facade.load_object("hero").unwrap();

        let keeper = f.facade.instantiate(&object);
        let disposable = f.facade.instantiate(&object);
        f.facade.release(keeper, false);
        f.facade.release(disposable, true);

        // A pooled instance remains, so the package must stay loaded.
        assert!(f.facade.cache().is_loaded("hero.bd"));
    }

    #[test]
    fn test_deferred_loads_wait_for_index() {
        let mut f = fixture(vec![], &[]);
        f.facade.load_object_deferred("hero");

        assert!(f.facade.resolve_deferred().is_empty());
        assert_eq!(f.facade.deferred_count(), 1);
    }

    #[test]
    fn test_deferred_loads_resolve_once_index_present() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        f.facade.load_object_deferred("hero");
        f.facade.load_object_deferred("unknown");

        let resolved = f.facade.resolve_deferred();
        assert_eq!(resolved.len(), 2);
        assert!(matches!(resolved[0].1, DeferredResult::Object(Ok(_))));
        assert!(matches!(
            resolved[1].1,
            DeferredResult::Object(Err(UpdateError::PackageNotFound { .. }))
        ));
        assert_eq!(f.facade.deferred_count(), 0);
    }

    #[test]
    fn test_deferred_instantiate_yields_ready_instance() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        f.facade.instantiate_deferred("hero");

        let mut resolved = f.facade.resolve_deferred();
        assert_eq!(resolved.len(), 1);
        let (path, result) = resolved.pop().unwrap();
        assert_eq!(path, "hero");
        let instance = match result {
            DeferredResult::Instance(Ok(instance)) => instance,
            other => panic!("expected an instance, got {other:?}"),
        };
        assert_eq!(instance.data(), b"bytes");
        assert!(f.facade.cache().is_loaded("hero.bd"));

        // Destroying the instance balances the deferred load.
        f.facade.release(instance, true);
        assert!(!f.facade.cache().is_loaded("hero.bd"));
    }

    #[test]
    fn test_preload_warms_pool_without_leaking_loads() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        f.facade.preload(&["hero"]).unwrap();

        assert!(f.facade.cache().is_loaded("hero.bd"));
        let pooled = f.facade.pools.get(&path_fingerprint("hero")).unwrap().len();
        assert_eq!(pooled, 1);
    }

    #[test]
    fn test_clear_drops_pools_and_cache() {
        let mut f = fixture(vec![record("hero", "hero.bd")], &[("hero.bd", b"bytes")]);
        let object = f.facade.load_object("hero").unwrap();
        let instance = f.facade.instantiate(&object);
        f.facade.release(instance, false);

        f.facade.clear();
        assert_eq!(f.facade.cache().loaded_count(), 0);
        assert!(f.facade.pools.is_empty());
    }
}
