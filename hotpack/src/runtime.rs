//! Process-wide hot-patch context.
//!
//! One [`HotPatchRuntime`] is constructed at startup and passed to
//! whatever drives the game loop; there is no global state. It wires
//! the update coordinator to per-module resource facades, refreshing a
//! module's package index when its config package lands and resolving
//! loads that were deferred while the index was missing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::UpdateConfig;
use crate::error::UpdateResult;
use crate::fetch::{ManifestFetcher, PackageFetcher};
use crate::layout;
use crate::resource::{DeferredResult, ResourceFacade, ResourceInstance, ResourceObject};
use crate::unpack::{DecompressController, UnpackOutcome, UnpackProgress};
use crate::update::{SessionPhase, UpdateCoordinator, UpdateNotification};

/// Everything a controlling-thread tick can surface.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// An update-pipeline notification.
    Update(UpdateNotification),

    /// A previously deferred load was attempted after its module's
    /// index arrived.
    DeferredLoaded {
        module: String,
        asset_path: String,
        result: UpdateResult<ResourceObject>,
    },

    /// A previously deferred instantiation was attempted after its
    /// module's index arrived.
    DeferredInstantiated {
        module: String,
        asset_path: String,
        result: UpdateResult<ResourceInstance>,
    },
}

/// Owns the coordinator and every open module facade.
pub struct HotPatchRuntime {
    config: UpdateConfig,
    coordinator: UpdateCoordinator,
    facades: HashMap<String, ResourceFacade>,
}

impl HotPatchRuntime {
    /// Build a runtime backed by the production HTTP fetcher.
    pub fn new(config: UpdateConfig) -> UpdateResult<Self> {
        let coordinator = UpdateCoordinator::with_http(config.clone())?;
        Ok(Self {
            config,
            coordinator,
            facades: HashMap::new(),
        })
    }

    /// Build a runtime with explicit fetcher implementations.
    pub fn with_fetchers(
        config: UpdateConfig,
        manifest_fetcher: Arc<dyn ManifestFetcher>,
        package_fetcher: Arc<dyn PackageFetcher>,
    ) -> Self {
        let coordinator =
            UpdateCoordinator::new(config.clone(), manifest_fetcher, package_fetcher);
        Self {
            config,
            coordinator,
            facades: HashMap::new(),
        }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Begin a hot update for a module. See
    /// [`UpdateCoordinator::request_update`].
    pub fn request_update(&mut self, module: &str, validate_version: bool) -> bool {
        self.coordinator.request_update(module, validate_version)
    }

    /// Probe a module's staleness without transferring anything.
    pub fn validate_assets(&mut self, module: &str) -> bool {
        self.coordinator.validate_assets(module)
    }

    pub fn module_phase(&self, module: &str) -> Option<SessionPhase> {
        self.coordinator.module_phase(module)
    }

    pub fn allotment(&self, module: &str) -> Option<usize> {
        self.coordinator.allotment(module)
    }

    pub fn is_idle(&self) -> bool {
        self.coordinator.is_idle()
    }

    /// Unpack a module's embedded packages into the writable area.
    pub fn unpack_embedded(
        &self,
        module: &str,
        progress: UnpackProgress,
    ) -> UpdateResult<UnpackOutcome> {
        DecompressController::new(&self.config, module).run(progress)
    }

    /// Whether a hot-updated copy of a package exists on disk.
    pub fn exists_hot_asset(&self, module: &str, package_name: &str) -> bool {
        layout::hot_dir(&self.config.data_dir, module)
            .join(package_name)
            .exists()
    }

    /// The resource facade for a module, opened on first use.
    pub fn resources(&mut self, module: &str) -> UpdateResult<&mut ResourceFacade> {
        match self.facades.entry(module.to_lowercase()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let facade = ResourceFacade::open(&self.config, entry.key().clone())?;
                Ok(entry.insert(facade))
            }
        }
    }

    /// Drain worker events, refresh indexes, resolve deferred loads.
    pub fn tick(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();

        for notification in self.coordinator.tick() {
            let refresh = match &notification {
                UpdateNotification::PackageCompleted { module, package }
                    if layout::is_config_package(package) =>
                {
                    Some(module.clone())
                }
                UpdateNotification::Completed { module, .. } => Some(module.clone()),
                _ => None,
            };

            events.push(RuntimeEvent::Update(notification));

            if let Some(module) = refresh {
                self.refresh_module(&module, &mut events);
            }
        }

        events
    }

    fn refresh_module(&mut self, module: &str, events: &mut Vec<RuntimeEvent>) {
        let Some(facade) = self.facades.get_mut(module) else {
            return;
        };

        if let Err(error) = facade.refresh(&self.config) {
            warn!(module = %module, %error, "index refresh failed");
            return;
        }

        for (asset_path, result) in facade.resolve_deferred() {
            events.push(match result {
                DeferredResult::Object(result) => RuntimeEvent::DeferredLoaded {
                    module: module.to_string(),
                    asset_path,
                    result,
                },
                DeferredResult::Instance(result) => RuntimeEvent::DeferredInstantiated {
                    module: module.to_string(),
                    asset_path,
                    result,
                },
            });
        }
    }
}
