//! Content-addressed dependency cache installation.
//!
//! Every project's declared ranges are resolved to concrete versions first;
//! the cache key is the SHA-256 of the resolved pair. Two projects whose
//! ranges differ but resolve identically therefore share one installed
//! cache directory, across repeated runs as well.

use anyhow::{bail, Context, Result};
use capstan_core::process::run_with_timeout;
use capstan_core::{DiagnosticEmitter, DiagnosticKind, DiagnosticSeverity};
use capstan_graph::{CdsDependencyGraph, CDS_DK_PACKAGE, CDS_PACKAGE};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::resolver::{PackageRegistry, VersionResolver};

/// A unique resolved (compiler, toolkit) version pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCombination {
    /// Requested ranges, kept for reporting.
    pub cds_version: String,
    pub cds_dk_version: String,
    /// SHA-256 over the resolved pair; the cache directory key.
    pub hash: String,
    pub resolved_cds_version: Option<String>,
    pub resolved_cds_dk_version: Option<String>,
    pub is_fallback: bool,
    pub warning: Option<String>,
}

impl DependencyCombination {
    fn actual_cds_version(&self) -> &str {
        self.resolved_cds_version
            .as_deref()
            .unwrap_or(&self.cds_version)
    }

    fn actual_cds_dk_version(&self) -> &str {
        self.resolved_cds_dk_version
            .as_deref()
            .unwrap_or(&self.cds_dk_version)
    }
}

/// Boundary to the external package manager.
pub trait PackageInstaller {
    fn install(&self, dir: &Path) -> Result<()>;
}

/// Installs with `npm install` under a bounded timeout; a timeout is an
/// ordinary failed installation.
pub struct NpmInstaller {
    timeout: Duration,
}

impl NpmInstaller {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PackageInstaller for NpmInstaller {
    fn install(&self, dir: &Path) -> Result<()> {
        let mut command = Command::new("npm");
        command
            .args(["install", "--quiet", "--no-audit", "--no-fund"])
            .current_dir(dir);

        let output = run_with_timeout(&mut command, self.timeout)
            .with_context(|| format!("npm install failed in {}", dir.display()))?;
        if !output.success {
            bail!(
                "npm install exited with an error in {}: {}",
                dir.display(),
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

/// Groups projects by resolved dependency combination and installs each
/// combination once into its own cache directory.
pub struct CacheInstaller<'a> {
    resolver: VersionResolver<'a>,
    installer: &'a dyn PackageInstaller,
    diagnostics: &'a dyn DiagnosticEmitter,
    cache_dir_name: String,
}

impl<'a> CacheInstaller<'a> {
    pub fn new(
        registry: &'a dyn PackageRegistry,
        installer: &'a dyn PackageInstaller,
        diagnostics: &'a dyn DiagnosticEmitter,
        cache_dir_name: impl Into<String>,
    ) -> Self {
        Self {
            resolver: VersionResolver::new(registry),
            installer,
            diagnostics,
            cache_dir_name: cache_dir_name.into(),
        }
    }

    /// Install the dependency caches for every project in the graph and
    /// return the project-dir → cache-dir mapping. Install failures skip
    /// that combination and leave its projects unmapped; the run continues.
    pub fn install_for_graph(
        &mut self,
        graph: &CdsDependencyGraph,
        source_root: &Path,
    ) -> BTreeMap<String, PathBuf> {
        let mut mapping: BTreeMap<String, PathBuf> = BTreeMap::new();

        if graph.projects.is_empty() {
            info!("No CDS projects found for dependency installation");
            return mapping;
        }

        // Resolved version pair per project, and the deduplicated
        // combinations keyed by hash.
        let mut project_versions: BTreeMap<String, (String, String)> = BTreeMap::new();
        let mut combinations: BTreeMap<String, DependencyCombination> = BTreeMap::new();

        for (project_dir, project) in &graph.projects {
            let descriptor = match &project.package_json {
                Some(descriptor) => descriptor,
                None => continue,
            };

            let cds_range = descriptor
                .dependencies
                .get(CDS_PACKAGE)
                .cloned()
                .unwrap_or_else(|| "latest".to_string());
            let cds_dk_range = descriptor
                .dev_dependencies
                .get(CDS_DK_PACKAGE)
                .cloned()
                .unwrap_or_else(|| cds_range.clone());

            info!(
                project = %project_dir,
                cds = %cds_range,
                cds_dk = %cds_dk_range,
                "Resolving CDS dependency versions"
            );
            let resolved = self.resolver.resolve_cds_versions(&cds_range, &cds_dk_range);

            if resolved.resolved_cds_version.is_none()
                && resolved.resolved_cds_dk_version.is_none()
            {
                error!(
                    project = %project_dir,
                    "Failed to resolve CDS dependencies; project will not be mapped to a cache"
                );
                continue;
            }

            let actual_cds = resolved
                .resolved_cds_version
                .clone()
                .unwrap_or_else(|| cds_range.clone());
            let actual_cds_dk = resolved
                .resolved_cds_dk_version
                .clone()
                .unwrap_or_else(|| cds_dk_range.clone());

            let hash = combination_hash(&actual_cds, &actual_cds_dk);
            project_versions.insert(project_dir.clone(), (actual_cds, actual_cds_dk));
            combinations
                .entry(hash.clone())
                .or_insert_with(|| DependencyCombination {
                    cds_version: cds_range,
                    cds_dk_version: cds_dk_range,
                    hash,
                    resolved_cds_version: resolved.resolved_cds_version,
                    resolved_cds_dk_version: resolved.resolved_cds_dk_version,
                    is_fallback: resolved.is_fallback,
                    warning: resolved.warning,
                });
        }

        if combinations.is_empty() {
            warn!("No resolvable CDS dependencies found in any project");
            return mapping;
        }

        info!(
            count = combinations.len(),
            "Found unique CDS dependency combination(s)"
        );

        let cache_root = source_root.join(&self.cache_dir_name);
        if let Err(err) = fs::create_dir_all(&cache_root) {
            warn!(
                "Failed to create cache directory {}: {}; skipping dependency installation",
                cache_root.display(),
                err
            );
            return mapping;
        }

        let representative_descriptor = representative_package_json(graph, source_root);

        for combination in combinations.values() {
            let cache_dir = cache_root.join(format!("cds-{}", combination.hash));
            info!(
                combination = &combination.hash[..8],
                cache_dir = %cache_dir.display(),
                cds = combination.actual_cds_version(),
                cds_dk = combination.actual_cds_dk_version(),
                fallback = combination.is_fallback,
                "Processing dependency combination"
            );

            if !self.provision_combination(&cache_dir, combination, &representative_descriptor) {
                warn!(
                    combination = &combination.hash[..8],
                    "Skipping failed dependency combination"
                );
                continue;
            }

            for (project_dir, (cds, cds_dk)) in &project_versions {
                if cds == combination.actual_cds_version()
                    && cds_dk == combination.actual_cds_dk_version()
                {
                    mapping.insert(project_dir.clone(), cache_dir.clone());
                }
            }
        }

        if mapping.is_empty() {
            warn!("No project to cache directory mappings created");
        } else {
            for (project_dir, cache_dir) in &mapping {
                info!(project = %project_dir, cache = %cache_dir.display(), "Mapped project to cache");
            }
        }

        mapping
    }

    /// Ensure one combination's cache directory exists and is installed.
    /// Returns false when this combination must be skipped.
    fn provision_combination(
        &mut self,
        cache_dir: &Path,
        combination: &DependencyCombination,
        representative_descriptor: &Option<PathBuf>,
    ) -> bool {
        // Both package directories present means a prior run installed this
        // combination already.
        let marker_present = cache_dir.join("node_modules/@sap/cds").is_dir()
            && cache_dir.join("node_modules/@sap/cds-dk").is_dir();
        if marker_present {
            info!(
                combination = &combination.hash[..8],
                "Using cached dependencies"
            );
            self.emit_fallback_diagnostic(combination, representative_descriptor);
            return true;
        }

        let (resolved_cds, resolved_cds_dk) = match (
            &combination.resolved_cds_version,
            &combination.resolved_cds_dk_version,
        ) {
            (Some(cds), Some(cds_dk)) => (cds, cds_dk),
            _ => {
                error!("Cannot install dependencies: no compatible versions found");
                return false;
            }
        };

        if let Err(err) = fs::create_dir_all(cache_dir) {
            error!(
                "Failed to create cache directory {}: {}",
                cache_dir.display(),
                err
            );
            return false;
        }

        let descriptor = json!({
            "name": format!("capstan-cache-{}", &combination.hash[..8]),
            "version": "1.0.0",
            "private": true,
            "dependencies": {
                CDS_PACKAGE: resolved_cds,
                CDS_DK_PACKAGE: resolved_cds_dk,
            },
        });
        let descriptor_text = match serde_json::to_string_pretty(&descriptor) {
            Ok(text) => text,
            Err(err) => {
                error!("Failed to serialize cache package.json: {err}");
                return false;
            }
        };
        if let Err(err) = fs::write(cache_dir.join("package.json"), descriptor_text) {
            error!(
                "Failed to write package.json in {}: {}",
                cache_dir.display(),
                err
            );
            return false;
        }

        if combination.is_fallback {
            if let Some(warning) = &combination.warning {
                warn!("{warning}");
            }
        }

        info!(
            cds = resolved_cds,
            cds_dk = resolved_cds_dk,
            cache_dir = %cache_dir.display(),
            "Installing CDS dependencies"
        );
        if let Err(err) = self.installer.install(cache_dir) {
            error!(
                "Failed to install dependencies in {}: {:#}",
                cache_dir.display(),
                err
            );
            return false;
        }

        self.emit_fallback_diagnostic(combination, representative_descriptor);
        true
    }

    fn emit_fallback_diagnostic(
        &self,
        combination: &DependencyCombination,
        representative_descriptor: &Option<PathBuf>,
    ) {
        if !combination.is_fallback {
            return;
        }
        if let (Some(warning), Some(descriptor_path)) =
            (&combination.warning, representative_descriptor)
        {
            self.diagnostics.emit(
                DiagnosticKind::DependencyVersionFallback,
                descriptor_path,
                DiagnosticSeverity::Warning,
                warning,
            );
        }
    }
}

fn combination_hash(cds_version: &str, cds_dk_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{cds_version}|{cds_dk_version}").as_bytes());
    hex::encode(hasher.finalize())
}

/// The package.json path of the first project carrying a descriptor, used
/// to anchor fallback diagnostics.
fn representative_package_json(
    graph: &CdsDependencyGraph,
    source_root: &Path,
) -> Option<PathBuf> {
    graph
        .projects
        .iter()
        .find(|(_, project)| project.package_json.is_some())
        .map(|(project_dir, _)| {
            if project_dir == "." {
                source_root.join("package.json")
            } else {
                source_root.join(project_dir).join("package.json")
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::LogDiagnosticEmitter;
    use capstan_graph::{CdsProject, PackageDescriptor};
    use std::cell::RefCell;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeRegistry {
        versions: Vec<String>,
        fail: bool,
    }

    impl FakeRegistry {
        fn with_versions(versions: &[&str]) -> Self {
            Self {
                versions: versions.iter().map(|v| v.to_string()).collect(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                versions: Vec::new(),
                fail: true,
            }
        }
    }

    impl PackageRegistry for FakeRegistry {
        fn available_versions(&self, _package_name: &str) -> Result<Vec<String>> {
            if self.fail {
                bail!("registry unreachable");
            }
            Ok(self.versions.clone())
        }
    }

    #[derive(Default)]
    struct RecordingInstaller {
        installs: RefCell<Vec<PathBuf>>,
        fail: bool,
    }

    impl PackageInstaller for RecordingInstaller {
        fn install(&self, dir: &Path) -> Result<()> {
            self.installs.borrow_mut().push(dir.to_path_buf());
            if self.fail {
                bail!("install failed");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingEmitter {
        count: Mutex<usize>,
    }

    impl DiagnosticEmitter for CountingEmitter {
        fn emit(
            &self,
            _kind: DiagnosticKind,
            _file_path: &Path,
            _severity: DiagnosticSeverity,
            _markdown_message: &str,
        ) -> bool {
            *self.count.lock().unwrap() += 1;
            true
        }
    }

    fn graph_with_projects(specs: &[(&str, Option<&str>)]) -> CdsDependencyGraph {
        let mut graph = CdsDependencyGraph::new("/src");
        for (dir, descriptor_json) in specs {
            let mut project = CdsProject::new(*dir);
            project.package_json = descriptor_json
                .map(|json| serde_json::from_str::<PackageDescriptor>(json).unwrap());
            graph.projects.insert(dir.to_string(), project);
        }
        graph
    }

    fn versions(range: &str, dk_range: &str) -> String {
        format!(
            r#"{{"dependencies": {{"@sap/cds": "{range}"}}, "devDependencies": {{"@sap/cds-dk": "{dk_range}"}}}}"#
        )
    }

    #[test]
    fn test_projects_with_same_resolution_share_one_cache() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.0.0", "6.1.0", "6.1.3"]);
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let caret = versions("^6.1.0", "^6.1.0");
        let tilde = versions("~6.1.0", "~6.1.0");
        let graph = graph_with_projects(&[("a", Some(&caret)), ("b", Some(&tilde))]);

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["a"], mapping["b"]);
        assert_eq!(installer.installs.borrow().len(), 1);

        let cache_dir = &mapping["a"];
        assert!(cache_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("cds-"));
        assert!(cache_dir.join("package.json").is_file());
    }

    #[test]
    fn test_differing_resolutions_get_separate_caches() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["5.5.0", "6.1.3"]);
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let six = versions("^6.0.0", "^6.0.0");
        let five = versions("~5.5.0", "~5.5.0");
        let graph = graph_with_projects(&[("a", Some(&six)), ("b", Some(&five))]);

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert_eq!(mapping.len(), 2);
        assert_ne!(mapping["a"], mapping["b"]);
        assert_eq!(installer.installs.borrow().len(), 2);
    }

    #[test]
    fn test_existing_marker_skips_installation() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.1.3"]);
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let desc = versions("^6.0.0", "^6.0.0");
        let graph = graph_with_projects(&[("a", Some(&desc))]);

        // Pre-create the install marker for the expected combination.
        let hash = combination_hash("6.1.3", "6.1.3");
        let cache_dir = temp.path().join(".capstan-cache").join(format!("cds-{hash}"));
        fs::create_dir_all(cache_dir.join("node_modules/@sap/cds")).unwrap();
        fs::create_dir_all(cache_dir.join("node_modules/@sap/cds-dk")).unwrap();

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert_eq!(mapping["a"], cache_dir);
        assert!(installer.installs.borrow().is_empty());
    }

    #[test]
    fn test_install_failure_leaves_projects_unmapped() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.1.3"]);
        let installer = RecordingInstaller {
            fail: true,
            ..RecordingInstaller::default()
        };
        let emitter = LogDiagnosticEmitter;
        let desc = versions("^6.0.0", "^6.0.0");
        let graph = graph_with_projects(&[("a", Some(&desc))]);

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert!(mapping.is_empty());
    }

    #[test]
    fn test_project_without_descriptor_unmapped() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.1.3"]);
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let desc = versions("^6.0.0", "^6.0.0");
        let graph = graph_with_projects(&[("a", Some(&desc)), ("bare", None)]);

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert!(mapping.contains_key("a"));
        assert!(!mapping.contains_key("bare"));
    }

    #[test]
    fn test_registry_failure_yields_no_combinations() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::failing();
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let desc = versions("^6.0.0", "^6.0.0");
        let graph = graph_with_projects(&[("a", Some(&desc))]);

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert!(mapping.is_empty());
        assert!(installer.installs.borrow().is_empty());
    }

    #[test]
    fn test_fallback_emits_diagnostic() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.0.0", "7.0.0"]);
        let installer = RecordingInstaller::default();
        let emitter = CountingEmitter::default();
        let desc = versions("8.0.0", "8.0.0");
        let graph = graph_with_projects(&[("a", Some(&desc))]);

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert_eq!(mapping.len(), 1);
        assert_eq!(*emitter.count.lock().unwrap(), 1);
    }

    #[test]
    fn test_mapping_stable_across_runs() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.1.3"]);
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let desc = versions("^6.0.0", "^6.0.0");
        let graph = graph_with_projects(&[("a", Some(&desc))]);

        let first = CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache")
            .install_for_graph(&graph, temp.path());
        let second = CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache")
            .install_for_graph(&graph, temp.path());

        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_graph_returns_empty_mapping() {
        let temp = TempDir::new().unwrap();
        let registry = FakeRegistry::with_versions(&["6.1.3"]);
        let installer = RecordingInstaller::default();
        let emitter = LogDiagnosticEmitter;
        let graph = CdsDependencyGraph::new("/src");

        let mut cache_installer =
            CacheInstaller::new(&registry, &installer, &emitter, ".capstan-cache");
        let mapping = cache_installer.install_for_graph(&graph, temp.path());

        assert!(mapping.is_empty());
    }
}
