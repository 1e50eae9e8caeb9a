//! Dependency graph construction.
//!
//! [`GraphBuilder::build`] never fails: structural problems are recorded as
//! critical errors on the returned graph (phase `Failed`), per-file problems
//! become warnings, and callers decide whether the result is usable.

use capstan_core::FileSystem;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::discovery;
use crate::imports;
use crate::model::{
    CdsDependencyGraph, CdsImport, CdsProject, ExtractionPhase, PackageDescriptor, ProjectStatus,
};
use crate::planner;

/// Read-through caches scoped to a single graph build, so repeated probes of
/// the same descriptor or source file hit the disk once.
#[derive(Default)]
pub struct FileCache {
    contents: HashMap<PathBuf, Option<String>>,
    descriptors: HashMap<PathBuf, Option<PackageDescriptor>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_content(&mut self, fs: &dyn FileSystem, path: &Path) -> Option<String> {
        if let Some(cached) = self.contents.get(path) {
            return cached.clone();
        }
        let content = fs.read_to_string(path).ok();
        self.contents.insert(path.to_path_buf(), content.clone());
        content
    }

    pub fn descriptor(&mut self, fs: &dyn FileSystem, path: &Path) -> Option<PackageDescriptor> {
        if let Some(cached) = self.descriptors.get(path) {
            return cached.clone();
        }
        let descriptor = discovery::read_package_descriptor(fs, path);
        self.descriptors.insert(path.to_path_buf(), descriptor.clone());
        descriptor
    }
}

pub struct GraphBuilder<'fs> {
    fs: &'fs dyn FileSystem,
    source_root: PathBuf,
    cache: FileCache,
}

impl<'fs> GraphBuilder<'fs> {
    pub fn new(fs: &'fs dyn FileSystem, source_root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            source_root: source_root.into(),
            cache: FileCache::new(),
        }
    }

    /// Build the full dependency graph: discovery, edge resolution, and
    /// compilation planning, ending in phase `DependencyResolution`.
    pub fn build(mut self) -> CdsDependencyGraph {
        let started = Instant::now();
        let mut graph = CdsDependencyGraph::new(self.source_root.clone());

        info!(
            source_root = %self.source_root.display(),
            "Building CDS project dependency graph"
        );

        if let Err(err) =
            graph.advance_phase(ExtractionPhase::Initializing, ExtractionPhase::Parsing)
        {
            graph.record_critical(format!("Phase error starting graph build: {err}"));
            return graph;
        }

        let project_dirs =
            match discovery::determine_cds_projects_under_source_dir(self.fs, &self.source_root) {
                Ok(dirs) => dirs,
                Err(err) => {
                    graph.record_critical(format!("Project discovery failed: {err:#}"));
                    return graph;
                }
            };

        info!(count = project_dirs.len(), "Detected CDS project(s)");

        self.populate_projects(&mut graph, &project_dirs);
        self.resolve_edges(&mut graph);
        self.plan_projects(&mut graph);

        graph.status_summary.total_projects = graph.projects.len();
        graph.status_summary.total_cds_files =
            graph.projects.values().map(|p| p.cds_files.len()).sum();
        graph.status_summary.performance.parsing_duration_ms =
            started.elapsed().as_millis() as u64;
        graph.status_summary.performance.recompute_total();

        if let Err(err) =
            graph.advance_phase(ExtractionPhase::Parsing, ExtractionPhase::DependencyResolution)
        {
            graph.record_critical(format!("Phase error finishing graph build: {err}"));
            return graph;
        }

        graph
    }

    /// First pass: one `CdsProject` per detected directory, with its file
    /// set and descriptor. Files claimed by a nested project are removed
    /// from the enclosing one so the partition invariant holds.
    fn populate_projects(&mut self, graph: &mut CdsDependencyGraph, project_dirs: &[String]) {
        for dir in project_dirs {
            let absolute_dir = self.absolute(dir);
            let cds_files = match discovery::determine_cds_files_for_project_dir(
                self.fs,
                &self.source_root,
                &absolute_dir,
            ) {
                Ok(files) => files,
                Err(err) => {
                    graph.record_warning(format!("Error finding CDS files in {dir}: {err:#}"));
                    Vec::new()
                }
            };

            let mut project = CdsProject::new(dir.clone());
            project.cds_files = cds_files;
            project.package_json = self
                .cache
                .descriptor(self.fs, &absolute_dir.join("package.json"));
            graph.projects.insert(dir.clone(), project);
        }

        let keys: Vec<String> = graph.projects.keys().cloned().collect();
        for key in &keys {
            let nested: Vec<&String> = keys
                .iter()
                .filter(|other| *other != key && dir_is_nested_in(other, key))
                .collect();
            if nested.is_empty() {
                continue;
            }
            if let Some(project) = graph.projects.get_mut(key) {
                project
                    .cds_files
                    .retain(|file| !nested.iter().any(|n| file_in_project_dir(file, n)));
            }
        }
    }

    /// Second pass: scan every file for imports, resolve relative targets,
    /// and record directed edges to the owning projects.
    fn resolve_edges(&mut self, graph: &mut CdsDependencyGraph) {
        info!("Analyzing dependencies between CDS projects");

        let ownership: Vec<(String, Vec<String>)> = graph
            .projects
            .iter()
            .map(|(key, project)| (key.clone(), project.cds_files.clone()))
            .collect();

        let keys: Vec<String> = graph.projects.keys().cloned().collect();
        for key in keys {
            let (files, descriptor) = match graph.projects.get(&key) {
                Some(project) => (project.cds_files.clone(), project.package_json.clone()),
                None => continue,
            };

            let mut per_file_imports: BTreeMap<String, Vec<CdsImport>> = BTreeMap::new();
            let mut edges: BTreeSet<String> = BTreeSet::new();

            for file in &files {
                let absolute_file = self.source_root.join(file);
                let content = match self.cache.file_content(self.fs, &absolute_file) {
                    Some(content) => content,
                    None => {
                        graph.record_warning(format!("Error processing imports in {file}"));
                        continue;
                    }
                };

                let mut file_imports = imports::scan_imports(&content);
                let definitions = imports::scan_definitions(&content);
                debug!(
                    file = %file,
                    imports = file_imports.len(),
                    entities = definitions.entities.len(),
                    services = definitions.services.len(),
                    "Scanned CDS file"
                );

                for import in &mut file_imports {
                    if import.is_relative {
                        match resolve_relative_import(file, &import.path) {
                            Some(resolved) => {
                                for (other_key, other_files) in &ownership {
                                    if *other_key == key {
                                        continue;
                                    }
                                    let owns = other_files.iter().any(|f| f == &resolved)
                                        || file_in_project_dir(&resolved, other_key);
                                    if owns {
                                        edges.insert(other_key.clone());
                                    }
                                }
                                import.resolved_path = Some(resolved);
                            }
                            None => {
                                graph.record_warning(format!(
                                    "Could not resolve import path {} in {}",
                                    import.path, file
                                ));
                            }
                        }
                    } else if import.is_module {
                        let declared = descriptor
                            .as_ref()
                            .map(|d| d.declared_range(&module_name(&import.path)).is_some())
                            .unwrap_or(false);
                        if !declared {
                            debug!(
                                module = %import.path,
                                file = %file,
                                "Module import not declared in package.json"
                            );
                        }
                    }
                }

                per_file_imports.insert(file.clone(), file_imports);
            }

            if let Some(project) = graph.projects.get_mut(&key) {
                project.imports = per_file_imports;
                project.dependencies = edges;
                project.status = ProjectStatus::DependenciesResolved;
                project.timestamps.dependencies_resolved = Some(Utc::now());
            }
        }
    }

    /// Third pass: per-project compilation targets and expected outputs.
    fn plan_projects(&mut self, graph: &mut CdsDependencyGraph) {
        info!("Determining compilation targets for each project");

        let keys: Vec<String> = graph.projects.keys().cloned().collect();
        for key in keys {
            let plan = match graph.projects.get(&key) {
                Some(project) => {
                    planner::determine_files_to_compile(self.fs, &self.source_root, project)
                }
                None => continue,
            };
            if let Some(project) = graph.projects.get_mut(&key) {
                project.compilation_targets = plan.targets;
                project.expected_output_file = plan.expected_output_file;
            }
        }
    }

    fn absolute(&self, project_dir: &str) -> PathBuf {
        if project_dir == "." {
            self.source_root.clone()
        } else {
            self.source_root.join(project_dir)
        }
    }
}

fn dir_is_nested_in(child_key: &str, parent_key: &str) -> bool {
    if parent_key == "." {
        child_key != "."
    } else {
        child_key.starts_with(parent_key) && child_key[parent_key.len()..].starts_with('/')
    }
}

fn file_in_project_dir(file: &str, project_key: &str) -> bool {
    if project_key == "." {
        true
    } else {
        file.starts_with(project_key) && file[project_key.len()..].starts_with('/')
    }
}

/// Resolve a relative import against the importing file's directory,
/// appending the `.cds` suffix when absent. Returns `None` when the target
/// escapes the source root.
fn resolve_relative_import(importing_file: &str, import_path: &str) -> Option<String> {
    let base = Path::new(importing_file)
        .parent()
        .unwrap_or_else(|| Path::new(""));

    let mut normalized: Vec<String> = Vec::new();
    for component in base.join(import_path).components() {
        match component {
            Component::Normal(part) => normalized.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                normalized.pop()?;
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let mut resolved = normalized.join("/");
    if !resolved.ends_with(".cds") {
        resolved.push_str(".cds");
    }
    Some(resolved)
}

/// The package a module import belongs to: the first path segment, or the
/// first two for scoped packages.
fn module_name(import_path: &str) -> String {
    let mut segments = import_path.split('/');
    match segments.next() {
        Some(scope) if scope.starts_with('@') => match segments.next() {
            Some(name) => format!("{scope}/{name}"),
            None => scope.to_string(),
        },
        Some(name) => name.to_string(),
        None => String::new(),
    }
}
