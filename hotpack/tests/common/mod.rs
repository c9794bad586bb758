//! Shared fixtures for integration tests.
//!
//! This module is shared across multiple test files using the
//! tests/common/ pattern; not every test file uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use sha2::{Digest, Sha256};

use hotpack::error::{UpdateError, UpdateResult};
use hotpack::fetch::{ManifestFetcher, PackageFetcher, ProgressFn};
use hotpack::layout;
use hotpack::manifest::{Manifest, Patch, PatchEntry};

/// Serves manifests and package bytes from memory.
///
/// Package transfers can be held behind a gate so tests can observe
/// scheduler state while downloads are "in flight".
pub struct FakeServer {
    manifests: Mutex<HashMap<String, Manifest>>,
    packages: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    gate: (Mutex<bool>, Condvar),
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            manifests: Mutex::new(HashMap::new()),
            packages: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            gate: (Mutex::new(false), Condvar::new()),
        })
    }

    pub fn publish_manifest(&self, url: &str, manifest: Manifest) {
        self.manifests
            .lock()
            .unwrap()
            .insert(url.to_string(), manifest);
    }

    pub fn publish_package(&self, url: &str, payload: Vec<u8>) {
        self.packages
            .lock()
            .unwrap()
            .insert(url.to_string(), payload);
    }

    /// Make one package URL fail every attempt.
    pub fn fail_package(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Block package transfers until [`release_packages`] is called.
    ///
    /// [`release_packages`]: FakeServer::release_packages
    pub fn hold_packages(&self) {
        *self.gate.0.lock().unwrap() = true;
    }

    pub fn release_packages(&self) {
        *self.gate.0.lock().unwrap() = false;
        self.gate.1.notify_all();
    }
}

impl ManifestFetcher for FakeServer {
    fn fetch_manifest(&self, url: &str) -> UpdateResult<Manifest> {
        self.manifests
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| UpdateError::Network {
                url: url.to_string(),
                reason: "GET request failed with status 404".to_string(),
            })
    }
}

impl PackageFetcher for FakeServer {
    fn fetch_package(&self, url: &str, dest: &Path, progress: ProgressFn) -> UpdateResult<u64> {
        let (lock, condvar) = &self.gate;
        let mut held = lock.lock().unwrap();
        while *held {
            held = condvar.wait(held).unwrap();
        }
        drop(held);

        if self.failing.lock().unwrap().contains(url) {
            return Err(UpdateError::Network {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            });
        }

        let payload = self
            .packages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| UpdateError::Network {
                url: url.to_string(),
                reason: "GET request failed with status 404".to_string(),
            })?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(dest, &payload).unwrap();
        progress(payload.len() as u64);
        Ok(payload.len() as u64)
    }
}

pub fn sha_hex(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

pub fn entry_for(name: &str, payload: &[u8], size_kb: f64) -> PatchEntry {
    PatchEntry {
        package_name: name.to_string(),
        content_hash: sha_hex(payload),
        size_kb,
    }
}

/// Publish one module with a single patch; one payload per package.
pub fn publish_module(
    server: &FakeServer,
    base_url: &str,
    module: &str,
    version: u32,
    packages: &[(&str, &[u8], f64)],
) {
    let entries = packages
        .iter()
        .map(|(name, payload, size_kb)| entry_for(name, payload, *size_kb))
        .collect();
    let manifest = Manifest {
        download_base_url: base_url.to_string(),
        patches: vec![Patch { version, entries }],
    };

    server.publish_manifest(&layout::manifest_endpoint(base_url, module), manifest);
    for (name, payload, _) in packages {
        server.publish_package(
            &layout::package_endpoint(base_url, name),
            payload.to_vec(),
        );
    }
}
