//! Reference-counted package cache.
//!
//! A module's config package carries an index mapping logical asset
//! paths to the package holding them plus that package's dependencies.
//! The cache parses the index into descriptors keyed by path
//! fingerprint and keeps one refcounted entry per physically loaded
//! package.

mod index;
mod store;

pub use index::{path_fingerprint, IndexRecord, PackageDescriptor, PackageIndex};
pub use store::{PackageCache, PackageHandle};
