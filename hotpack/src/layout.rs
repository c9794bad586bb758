//! Path and naming conventions for modules, manifests, and packages.
//!
//! Every on-disk location and remote endpoint is derived here so the rest
//! of the crate never concatenates paths by hand. Module names are
//! lowercased in file and URL names; callers may pass any casing.

use std::path::{Path, PathBuf};

/// Name marker identifying a module's package index/config package.
pub const CONFIG_TAG: &str = "_config";

/// File extension for content packages.
pub const PACKAGE_EXTENSION: &str = ".bd";

/// Remote endpoint of a module's patch manifest.
pub fn manifest_endpoint(base_url: &str, module: &str) -> String {
    format!(
        "{}/HotPatch/{}_PatchManifest.json",
        base_url.trim_end_matches('/'),
        module.to_lowercase()
    )
}

/// Remote endpoint of one package file.
pub fn package_endpoint(base_url: &str, package_name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), package_name)
}

/// Snapshot of the last *fetched* server manifest, inside `dir`.
pub fn server_manifest_path(dir: &Path, module: &str) -> PathBuf {
    dir.join(format!(
        "Server_{}_PatchManifest.json",
        module.to_lowercase()
    ))
}

/// The last *applied* manifest, inside `dir`.
pub fn local_manifest_path(dir: &Path, module: &str) -> PathBuf {
    dir.join(format!(
        "Local_{}_PatchManifest.json",
        module.to_lowercase()
    ))
}

/// Directory receiving hot-updated package files for a module.
pub fn hot_dir(data_dir: &Path, module: &str) -> PathBuf {
    data_dir.join("HotPatch").join(module.to_lowercase())
}

/// Directory receiving unpacked embedded package files for a module.
pub fn unpack_dir(data_dir: &Path, module: &str) -> PathBuf {
    data_dir.join("DecompressAsset").join(module.to_lowercase())
}

/// Directory holding a module's embedded packages inside the install image.
pub fn embedded_dir(embedded_root: &Path, module: &str) -> PathBuf {
    embedded_root.join(module.to_lowercase())
}

/// File name of a module's embedded package index.
pub fn embedded_index_name(module: &str) -> String {
    format!("{}_info.json", module.to_lowercase())
}

/// File name of a module's package index/config package.
pub fn config_package_name(module: &str) -> String {
    format!("{}{}{}", module.to_lowercase(), CONFIG_TAG, PACKAGE_EXTENSION)
}

/// Whether a package name is a module's index/config package.
///
/// Config packages must land before ordinary packages, so schedulers move
/// them to the front of the download queue.
pub fn is_config_package(package_name: &str) -> bool {
    package_name.contains(CONFIG_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_endpoint() {
        assert_eq!(
            manifest_endpoint("http://cdn.example.com", "Core"),
            "http://cdn.example.com/HotPatch/core_PatchManifest.json"
        );
    }

    #[test]
    fn test_manifest_endpoint_trailing_slash() {
        assert_eq!(
            manifest_endpoint("http://cdn.example.com/", "core"),
            "http://cdn.example.com/HotPatch/core_PatchManifest.json"
        );
    }

    #[test]
    fn test_package_endpoint() {
        assert_eq!(
            package_endpoint("http://cdn.example.com", "a.bd"),
            "http://cdn.example.com/a.bd"
        );
    }

    #[test]
    fn test_manifest_paths_lowercase_module() {
        let dir = Path::new("/data");
        assert_eq!(
            server_manifest_path(dir, "Core"),
            PathBuf::from("/data/Server_core_PatchManifest.json")
        );
        assert_eq!(
            local_manifest_path(dir, "Core"),
            PathBuf::from("/data/Local_core_PatchManifest.json")
        );
    }

    #[test]
    fn test_module_dirs() {
        let dir = Path::new("/data");
        assert_eq!(hot_dir(dir, "Core"), PathBuf::from("/data/HotPatch/core"));
        assert_eq!(
            unpack_dir(dir, "Core"),
            PathBuf::from("/data/DecompressAsset/core")
        );
    }

    #[test]
    fn test_config_package_name() {
        assert_eq!(config_package_name("Core"), "core_config.bd");
    }

    #[test]
    fn test_is_config_package() {
        assert!(is_config_package("core_config.bd"));
        assert!(!is_config_package("characters.bd"));
    }

    #[test]
    fn test_embedded_index_name() {
        assert_eq!(embedded_index_name("Core"), "core_info.json");
    }
}
