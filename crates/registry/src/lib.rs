//! Dependency version resolution and cache installation.
//!
//! Projects declare `@sap/cds` / `@sap/cds-dk` version ranges; this crate
//! resolves them against the published version lists, groups projects by
//! resolved version pair, and installs each unique pair once into a
//! content-addressed cache directory shared by every matching project.

pub mod installer;
pub mod resolver;
pub mod semver;

pub use installer::{CacheInstaller, DependencyCombination, NpmInstaller, PackageInstaller};
pub use resolver::{NpmRegistry, PackageRegistry, ResolvedCdsVersions, VersionResolver};
pub use semver::{
    compare_versions, find_best_available_version, parse_semantic_version, satisfies_range,
    SemanticVersion,
};
