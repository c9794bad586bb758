//! Hotpack - hot updates and package caching for modular game content
//!
//! This library keeps a client's content modules current against a
//! remote patch server and serves the resulting packages to game code:
//! manifest comparison, a bounded multi-threaded download scheduler
//! with cross-module thread balancing, embedded-content unpacking, and
//! a dependency-aware reference-counted package cache.
//!
//! # High-Level API
//!
//! Most callers construct one [`runtime::HotPatchRuntime`] at startup
//! and drive it from their main loop:
//!
//! ```ignore
//! use hotpack::config::UpdateConfig;
//! use hotpack::runtime::HotPatchRuntime;
//!
//! let config = UpdateConfig::new("http://cdn.example.com", data_dir, embedded_root);
//! let mut runtime = HotPatchRuntime::new(config)?;
//!
//! runtime.request_update("game", true);
//! loop {
//!     for event in runtime.tick() {
//!         // react to progress, completion, deferred loads...
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod manifest;
pub mod resource;
pub mod runtime;
pub mod unpack;
pub mod update;

/// Version of the hotpack library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
