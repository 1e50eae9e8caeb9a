//! Data model for the CDS dependency graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::{CDS_DK_PACKAGE, CDS_PACKAGE};

/// One `using … from '…';` occurrence in a CDS file. Immutable once stored
/// in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdsImport {
    /// The full matched statement, as written.
    pub statement: String,
    /// Raw import target string.
    pub path: String,
    /// `./` or `../` prefixed.
    pub is_relative: bool,
    /// External package reference (anything not relative and not absolute).
    pub is_module: bool,
    /// Source-root-relative path of the imported file, when a relative
    /// import could be mapped to a concrete file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
}

/// npm `workspaces` is either a bare pattern list or an object wrapping one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkspaceList {
    Patterns(Vec<String>),
    Detailed { packages: Vec<String> },
}

impl WorkspaceList {
    pub fn patterns(&self) -> &[String] {
        match self {
            WorkspaceList::Patterns(patterns) => patterns,
            WorkspaceList::Detailed { packages } => packages,
        }
    }
}

/// The subset of a `package.json` descriptor this tool cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(
        default,
        rename = "devDependencies",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspaces: Option<WorkspaceList>,
}

impl PackageDescriptor {
    /// Look up a declared range for `package` across production and dev
    /// dependency tables, production winning.
    pub fn declared_range(&self, package: &str) -> Option<&str> {
        self.dependencies
            .get(package)
            .or_else(|| self.dev_dependencies.get(package))
            .map(String::as_str)
    }

    /// Whether the descriptor declares the CDS compiler or its toolkit.
    pub fn declares_cap_dependency(&self) -> bool {
        self.declared_range(CDS_PACKAGE).is_some() || self.declared_range(CDS_DK_PACKAGE).is_some()
    }

    /// Whether the descriptor declares a non-empty multi-package workspace.
    pub fn is_workspace_root(&self) -> bool {
        self.workspaces
            .as_ref()
            .map(|w| !w.patterns().is_empty())
            .unwrap_or(false)
    }
}

/// What the external compiler should be handed for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "files", rename_all = "snake_case")]
pub enum CompilationTargets {
    /// Compile the whole project in one unified build.
    Project,
    /// Compile each listed file individually (source-root-relative paths).
    Files(Vec<String>),
}

impl CompilationTargets {
    pub fn is_project_level(&self) -> bool {
        matches!(self, CompilationTargets::Project)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CompilationTargets::Files(files) if files.is_empty())
    }

    /// Number of compiler invocations this plan produces.
    pub fn task_count(&self) -> usize {
        match self {
            CompilationTargets::Project => 1,
            CompilationTargets::Files(files) => files.len(),
        }
    }
}

impl Default for CompilationTargets {
    fn default() -> Self {
        CompilationTargets::Files(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Discovered,
    DependenciesResolved,
    CompilationPlanned,
    Compiling,
    Completed,
    Failed,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectStatus::Discovered => "discovered",
            ProjectStatus::DependenciesResolved => "dependencies_resolved",
            ProjectStatus::CompilationPlanned => "compilation_planned",
            ProjectStatus::Compiling => "compiling",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTimestamps {
    pub discovered: Option<DateTime<Utc>>,
    pub dependencies_resolved: Option<DateTime<Utc>>,
    pub compilation_started: Option<DateTime<Utc>>,
    pub compilation_completed: Option<DateTime<Utc>>,
}

/// One detected CDS/CAP project. `project_dir` is the graph-wide unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdsProject {
    /// Source-root-relative directory path; `.` for the source root itself.
    pub project_dir: String,
    /// Sorted, source-root-relative `.cds` file paths owned by this project.
    pub cds_files: Vec<String>,
    pub compilation_targets: CompilationTargets,
    /// `model.cds.json` under the project dir for unified and single-file
    /// builds; `None` when each target file produces its own `<file>.json`.
    pub expected_output_file: Option<String>,
    pub package_json: Option<PackageDescriptor>,
    /// Per-file import records, keyed by source-root-relative file path.
    pub imports: BTreeMap<String, Vec<CdsImport>>,
    /// Directed edges to other projects this one imports from, by key.
    pub dependencies: BTreeSet<String>,
    pub status: ProjectStatus,
    pub timestamps: ProjectTimestamps,
}

impl CdsProject {
    pub fn new(project_dir: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            cds_files: Vec::new(),
            compilation_targets: CompilationTargets::default(),
            expected_output_file: None,
            package_json: None,
            imports: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            status: ProjectStatus::Discovered,
            timestamps: ProjectTimestamps {
                discovered: Some(Utc::now()),
                ..ProjectTimestamps::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPhase {
    Initializing,
    Parsing,
    DependencyResolution,
    CompilationPlanning,
    Compiling,
    Extracting,
    Completed,
    Failed,
}

impl fmt::Display for ExtractionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionPhase::Initializing => "initializing",
            ExtractionPhase::Parsing => "parsing",
            ExtractionPhase::DependencyResolution => "dependency_resolution",
            ExtractionPhase::CompilationPlanning => "compilation_planning",
            ExtractionPhase::Compiling => "compiling",
            ExtractionPhase::Extracting => "extracting",
            ExtractionPhase::Completed => "completed",
            ExtractionPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("expected phase {expected}, but graph is in phase {actual}")]
    UnexpectedPhase {
        expected: ExtractionPhase,
        actual: ExtractionPhase,
    },
    #[error("cannot advance from phase {from} to {to}")]
    InvalidTransition {
        from: ExtractionPhase,
        to: ExtractionPhase,
    },
}

/// Millisecond durations per phase. `total_duration_ms` is kept equal to the
/// sum of the phase fields via [`PhaseDurations::recompute_total`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    pub total_duration_ms: u64,
    pub parsing_duration_ms: u64,
    pub compilation_duration_ms: u64,
    pub extraction_duration_ms: u64,
}

impl PhaseDurations {
    pub fn recompute_total(&mut self) {
        self.total_duration_ms =
            self.parsing_duration_ms + self.compilation_duration_ms + self.extraction_duration_ms;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSummary {
    pub overall_success: bool,
    pub total_projects: usize,
    pub total_cds_files: usize,
    pub total_compilation_tasks: usize,
    pub successful_compilations: usize,
    pub failed_compilations: usize,
    pub skipped_compilations: usize,
    pub retried_compilations: usize,
    pub json_files_generated: usize,
    pub performance: PhaseDurations,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphError {
    pub phase: ExtractionPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphErrors {
    pub critical: Vec<GraphError>,
    pub warnings: Vec<GraphError>,
}

/// Top-level aggregate produced by [`crate::GraphBuilder`] and threaded
/// through the sequential extraction phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdsDependencyGraph {
    pub id: Uuid,
    pub source_root: PathBuf,
    pub projects: BTreeMap<String, CdsProject>,
    pub current_phase: ExtractionPhase,
    pub status_summary: StatusSummary,
    pub errors: GraphErrors,
}

impl CdsDependencyGraph {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_root: source_root.into(),
            projects: BTreeMap::new(),
            current_phase: ExtractionPhase::Initializing,
            status_summary: StatusSummary::default(),
            errors: GraphErrors::default(),
        }
    }

    /// Advance the phase state machine. The caller states which phase it
    /// believes the graph is in; a mismatch or a non-monotonic target is
    /// rejected, so no phase can run twice on the same graph instance.
    pub fn advance_phase(
        &mut self,
        expected: ExtractionPhase,
        next: ExtractionPhase,
    ) -> Result<(), PhaseError> {
        if self.current_phase != expected {
            return Err(PhaseError::UnexpectedPhase {
                expected,
                actual: self.current_phase,
            });
        }
        if next != ExtractionPhase::Failed && next <= self.current_phase {
            return Err(PhaseError::InvalidTransition {
                from: self.current_phase,
                to: next,
            });
        }
        self.current_phase = next;
        Ok(())
    }

    /// Record an abort-worthy error and move the graph to `Failed`.
    pub fn record_critical(&mut self, message: impl Into<String>) {
        self.errors.critical.push(GraphError {
            phase: self.current_phase,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.current_phase = ExtractionPhase::Failed;
        self.status_summary.overall_success = false;
    }

    /// Record a non-fatal warning scoped to the current phase.
    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.errors.warnings.push(GraphError {
            phase: self.current_phase,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_declared_range_prefers_production() {
        let mut descriptor = PackageDescriptor::default();
        descriptor
            .dependencies
            .insert(CDS_PACKAGE.to_string(), "^6.0.0".to_string());
        descriptor
            .dev_dependencies
            .insert(CDS_PACKAGE.to_string(), "^7.0.0".to_string());

        assert_eq!(descriptor.declared_range(CDS_PACKAGE), Some("^6.0.0"));
        assert!(descriptor.declares_cap_dependency());
    }

    #[test]
    fn test_descriptor_dev_dependency_counts() {
        let mut descriptor = PackageDescriptor::default();
        descriptor
            .dev_dependencies
            .insert(CDS_DK_PACKAGE.to_string(), "~6.1.0".to_string());

        assert!(descriptor.declares_cap_dependency());
        assert_eq!(descriptor.declared_range(CDS_DK_PACKAGE), Some("~6.1.0"));
    }

    #[test]
    fn test_workspace_list_both_shapes() {
        let bare: PackageDescriptor =
            serde_json::from_str(r#"{"workspaces": ["packages/*"]}"#).unwrap();
        assert!(bare.is_workspace_root());

        let wrapped: PackageDescriptor =
            serde_json::from_str(r#"{"workspaces": {"packages": ["packages/*"]}}"#).unwrap();
        assert!(wrapped.is_workspace_root());

        let empty: PackageDescriptor = serde_json::from_str(r#"{"workspaces": []}"#).unwrap();
        assert!(!empty.is_workspace_root());

        let absent: PackageDescriptor = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(!absent.is_workspace_root());
    }

    #[test]
    fn test_phase_advance_happy_path() {
        let mut graph = CdsDependencyGraph::new("/src");
        graph
            .advance_phase(ExtractionPhase::Initializing, ExtractionPhase::Parsing)
            .unwrap();
        graph
            .advance_phase(ExtractionPhase::Parsing, ExtractionPhase::DependencyResolution)
            .unwrap();
        assert_eq!(graph.current_phase, ExtractionPhase::DependencyResolution);
    }

    #[test]
    fn test_phase_advance_rejects_wrong_expectation() {
        let mut graph = CdsDependencyGraph::new("/src");
        let err = graph
            .advance_phase(ExtractionPhase::Parsing, ExtractionPhase::DependencyResolution)
            .unwrap_err();
        assert_eq!(
            err,
            PhaseError::UnexpectedPhase {
                expected: ExtractionPhase::Parsing,
                actual: ExtractionPhase::Initializing,
            }
        );
    }

    #[test]
    fn test_phase_advance_rejects_regression() {
        let mut graph = CdsDependencyGraph::new("/src");
        graph
            .advance_phase(ExtractionPhase::Initializing, ExtractionPhase::Compiling)
            .unwrap();
        let err = graph
            .advance_phase(ExtractionPhase::Compiling, ExtractionPhase::Parsing)
            .unwrap_err();
        assert!(matches!(err, PhaseError::InvalidTransition { .. }));
    }

    #[test]
    fn test_phase_can_always_fail() {
        let mut graph = CdsDependencyGraph::new("/src");
        graph
            .advance_phase(ExtractionPhase::Initializing, ExtractionPhase::Failed)
            .unwrap();
        assert_eq!(graph.current_phase, ExtractionPhase::Failed);
    }

    #[test]
    fn test_record_critical_fails_graph() {
        let mut graph = CdsDependencyGraph::new("/src");
        graph.record_critical("source root does not exist");

        assert_eq!(graph.current_phase, ExtractionPhase::Failed);
        assert_eq!(graph.errors.critical.len(), 1);
        assert_eq!(graph.errors.critical[0].phase, ExtractionPhase::Initializing);
        assert!(!graph.status_summary.overall_success);
    }

    #[test]
    fn test_phase_durations_total_is_sum() {
        let mut durations = PhaseDurations {
            parsing_duration_ms: 10,
            compilation_duration_ms: 20,
            extraction_duration_ms: 5,
            ..PhaseDurations::default()
        };
        durations.recompute_total();
        assert_eq!(durations.total_duration_ms, 35);
    }

    #[test]
    fn test_compilation_targets_helpers() {
        assert!(CompilationTargets::Project.is_project_level());
        assert_eq!(CompilationTargets::Project.task_count(), 1);
        assert!(CompilationTargets::default().is_empty());
        let files = CompilationTargets::Files(vec!["a.cds".into(), "b.cds".into()]);
        assert_eq!(files.task_count(), 2);
    }
}
