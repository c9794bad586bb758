//! Module package index and asset descriptors.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{UpdateError, UpdateResult};

/// Stable fingerprint of a logical asset path.
///
/// The first eight bytes of the path's SHA-256 digest, big-endian.
/// Collisions across the few thousand paths a module carries are not a
/// practical concern at 64 bits.
pub fn path_fingerprint(path: &str) -> u64 {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// One line of a module's package index, as shipped in the config
/// package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Logical asset path, e.g. `prefabs/ui/login_panel`.
    pub asset_path: String,

    /// Package file holding the asset.
    pub package_name: String,

    /// Packages that must be loaded before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Resolved cache metadata for one logical asset path.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDescriptor {
    pub asset_path: String,
    pub fingerprint: u64,
    pub package_name: String,
    /// Asset name within the package, the last path segment.
    pub asset_entry_name: String,
    pub module: String,
    pub dependencies: Vec<String>,
}

/// A module's parsed package index, keyed by path fingerprint.
pub struct PackageIndex {
    module: String,
    descriptors: HashMap<u64, PackageDescriptor>,
}

impl PackageIndex {
    /// Build an index from parsed records.
    ///
    /// Duplicate registrations for the same path are logged and
    /// skipped; the first record wins.
    pub fn from_records(module: impl Into<String>, records: Vec<IndexRecord>) -> Self {
        let module = module.into();
        let mut descriptors = HashMap::with_capacity(records.len());

        for record in records {
            let fingerprint = path_fingerprint(&record.asset_path);
            if descriptors.contains_key(&fingerprint) {
                warn!(
                    module = %module,
                    asset_path = %record.asset_path,
                    "duplicate package registration ignored"
                );
                continue;
            }

            let asset_entry_name = record
                .asset_path
                .rsplit('/')
                .next()
                .unwrap_or(&record.asset_path)
                .to_string();
            descriptors.insert(
                fingerprint,
                PackageDescriptor {
                    asset_path: record.asset_path,
                    fingerprint,
                    package_name: record.package_name,
                    asset_entry_name,
                    module: module.clone(),
                    dependencies: record.dependencies,
                },
            );
        }

        Self {
            module,
            descriptors,
        }
    }

    /// Parse the JSON index file a config package carries.
    pub fn load(module: impl Into<String>, path: &Path) -> UpdateResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| UpdateError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<IndexRecord> = serde_json::from_str(&content)
            .map_err(|e| UpdateError::Configuration(format!("parse {}: {e}", path.display())))?;
        Ok(Self::from_records(module, records))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Look up a descriptor by fingerprint.
    pub fn descriptor(&self, fingerprint: u64) -> Option<&PackageDescriptor> {
        self.descriptors.get(&fingerprint)
    }

    /// Look up a descriptor by logical path.
    pub fn descriptor_for_path(&self, asset_path: &str) -> Option<&PackageDescriptor> {
        self.descriptor(path_fingerprint(asset_path))
    }

    /// Iterate over every descriptor in the index.
    pub fn descriptors(&self) -> impl Iterator<Item = &PackageDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, package: &str, deps: &[&str]) -> IndexRecord {
        IndexRecord {
            asset_path: path.to_string(),
            package_name: package.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = path_fingerprint("prefabs/ui/login_panel");
        let b = path_fingerprint("prefabs/ui/login_panel");
        let c = path_fingerprint("prefabs/ui/shop_panel");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_index_resolves_by_path_and_fingerprint() {
        let index = PackageIndex::from_records(
            "game",
            vec![record("prefabs/ui/login_panel", "ui.bd", &["shared.bd"])],
        );

        let desc = index.descriptor_for_path("prefabs/ui/login_panel").unwrap();
        assert_eq!(desc.package_name, "ui.bd");
        assert_eq!(desc.asset_entry_name, "login_panel");
        assert_eq!(desc.module, "game");
        assert_eq!(desc.dependencies, vec!["shared.bd"]);
        assert_eq!(index.descriptor(desc.fingerprint).unwrap(), desc);
    }

    #[test]
    fn test_duplicate_paths_keep_first_record() {
        let index = PackageIndex::from_records(
            "game",
            vec![
                record("prefabs/hero", "first.bd", &[]),
                record("prefabs/hero", "second.bd", &[]),
            ],
        );

        assert_eq!(index.len(), 1);
        assert_eq!(
            index.descriptor_for_path("prefabs/hero").unwrap().package_name,
            "first.bd"
        );
    }

    #[test]
    fn test_index_round_trips_through_json() {
        let records = vec![record("a/b", "p.bd", &["q.bd"])];
        let json = serde_json::to_string(&records).unwrap();
        let parsed: Vec<IndexRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_dependencies_default_to_empty() {
        let parsed: Vec<IndexRecord> =
            serde_json::from_str(r#"[{"asset_path":"a","package_name":"p.bd"}]"#).unwrap();
        assert!(parsed[0].dependencies.is_empty());
    }
}
