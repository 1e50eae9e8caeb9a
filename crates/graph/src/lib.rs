//! Discovery and modeling of CAP/CDS projects.
//!
//! This crate turns an arbitrary source tree into a [`CdsDependencyGraph`]:
//! it locates project roots, scans `.cds` files for `using … from` imports,
//! links projects that reference each other's files, and decides per project
//! whether the external compiler should run once for the whole project or
//! once per root file.

pub mod builder;
pub mod discovery;
pub mod imports;
pub mod model;
pub mod planner;

pub use builder::GraphBuilder;
pub use model::{
    CdsDependencyGraph, CdsImport, CdsProject, CompilationTargets, ExtractionPhase,
    PackageDescriptor, ProjectStatus,
};

/// npm package name of the CDS compiler.
pub const CDS_PACKAGE: &str = "@sap/cds";

/// npm package name of the CDS development toolkit.
pub const CDS_DK_PACKAGE: &str = "@sap/cds-dk";

/// Canonical output artifact name for project-level and single-file builds.
pub const MODEL_CDS_JSON: &str = "model.cds.json";

/// Directory name of installed npm dependencies; never part of any project.
pub const NODE_MODULES_DIR: &str = "node_modules";

/// Suffix marking checked-in test fixture projects that must be ignored.
pub const TEST_PROJECT_SUFFIX: &str = ".testproj";
