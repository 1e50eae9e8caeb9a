use capstan_core::{CapstanConfig, DiagnosticEmitter, FileSystem, LogDiagnosticEmitter, RealFileSystem};
use capstan_graph::CdsDependencyGraph;
use capstan_registry::{NpmInstaller, NpmRegistry, PackageInstaller, PackageRegistry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compiler::{CdsCompiler, CliCdsCompiler};
use crate::project_install::{NpmProjectInstaller, ProjectInstaller};
use crate::tasks::CompilationTask;

/// Everything the phases share: configuration, the external boundaries, and
/// the artifacts accumulated so far.
pub struct ExtractionContext {
    pub source_root: PathBuf,
    pub config: CapstanConfig,
    pub fs: Box<dyn FileSystem>,
    pub registry: Box<dyn PackageRegistry>,
    pub installer: Box<dyn PackageInstaller>,
    pub project_installer: Box<dyn ProjectInstaller>,
    pub compiler: Box<dyn CdsCompiler>,
    pub diagnostics: Box<dyn DiagnosticEmitter>,
    /// Built by the parse phase.
    pub graph: Option<CdsDependencyGraph>,
    /// Built by the install phase: project dir → dependency cache dir.
    pub cache_dirs: BTreeMap<String, PathBuf>,
    /// Built by the plan phase: project dir → its compilation tasks.
    pub tasks: BTreeMap<String, Vec<CompilationTask>>,
}

impl ExtractionContext {
    /// Context wired to the production boundaries (real filesystem, npm,
    /// the `cds` CLI, log-only diagnostics). Tests replace individual
    /// fields with fakes.
    pub fn new(source_root: &Path, config: CapstanConfig) -> Self {
        let registry_timeout = Duration::from_secs(config.registry_timeout_secs);
        let install_timeout = Duration::from_secs(config.install_timeout_secs);
        let compile_timeout = Duration::from_secs(config.compile_timeout_secs);

        Self {
            source_root: source_root.to_path_buf(),
            config,
            fs: Box::new(RealFileSystem::new()),
            registry: Box::new(NpmRegistry::new(registry_timeout)),
            installer: Box::new(NpmInstaller::new(install_timeout)),
            project_installer: Box::new(NpmProjectInstaller::new(install_timeout)),
            compiler: Box::new(CliCdsCompiler::new(compile_timeout)),
            diagnostics: Box::new(LogDiagnosticEmitter),
            graph: None,
            cache_dirs: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }
}
