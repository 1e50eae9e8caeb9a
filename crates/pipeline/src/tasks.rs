//! Compilation task planning and execution.

use anyhow::{Context, Result};
use capstan_core::{DiagnosticEmitter, DiagnosticKind, DiagnosticSeverity};
use capstan_graph::{
    CdsDependencyGraph, CompilationTargets, ExtractionPhase, ProjectStatus, MODEL_CDS_JSON,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::compiler::{CdsCompiler, CompileRequest};
use crate::project_install::ProjectInstaller;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// One compiler invocation for a single source file.
    File,
    /// One unified invocation for the whole project.
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CompilationAttempt {
    pub cache_dir: Option<PathBuf>,
    pub started: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompilationTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub project_dir: String,
    /// Source-root-relative inputs; all project files for a `Project` task.
    pub source_files: Vec<String>,
    /// Source-root-relative expected artifact path.
    pub expected_output: String,
    pub status: TaskStatus,
    pub attempts: Vec<CompilationAttempt>,
}

impl CompilationTask {
    fn new(
        kind: TaskKind,
        project_dir: &str,
        source_files: Vec<String>,
        expected_output: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            project_dir: project_dir.to_string(),
            source_files,
            expected_output,
            status: TaskStatus::Pending,
            attempts: Vec::new(),
        }
    }

    fn last_error(&self) -> String {
        self.attempts
            .last()
            .and_then(|attempt| attempt.error.clone())
            .unwrap_or_else(|| "Compilation failed".to_string())
    }
}

/// Expand every project's planned targets into concrete tasks, advancing
/// the graph to `compilation_planning`.
pub fn plan_compilation_tasks(
    graph: &mut CdsDependencyGraph,
) -> Result<BTreeMap<String, Vec<CompilationTask>>> {
    info!("Planning compilation tasks for all projects");

    graph
        .advance_phase(
            ExtractionPhase::DependencyResolution,
            ExtractionPhase::CompilationPlanning,
        )
        .context("planning cannot start")?;

    let mut all_tasks: BTreeMap<String, Vec<CompilationTask>> = BTreeMap::new();

    for (project_dir, project) in graph.projects.iter_mut() {
        let tasks = match &project.compilation_targets {
            CompilationTargets::Project => {
                let expected = project
                    .expected_output_file
                    .clone()
                    .unwrap_or_else(|| model_output_path(project_dir));
                vec![CompilationTask::new(
                    TaskKind::Project,
                    project_dir,
                    project.cds_files.clone(),
                    expected,
                )]
            }
            CompilationTargets::Files(files) => match (&project.expected_output_file, &files[..]) {
                // A single-file project keeps the canonical artifact name.
                (Some(expected), [file]) => vec![CompilationTask::new(
                    TaskKind::File,
                    project_dir,
                    vec![file.clone()],
                    expected.clone(),
                )],
                _ => files
                    .iter()
                    .map(|file| {
                        CompilationTask::new(
                            TaskKind::File,
                            project_dir,
                            vec![file.clone()],
                            format!("{file}.json"),
                        )
                    })
                    .collect(),
            },
        };

        project.status = ProjectStatus::CompilationPlanned;
        info!(
            project = %project_dir,
            tasks = tasks.len(),
            "Planned compilation task(s)"
        );
        all_tasks.insert(project_dir.clone(), tasks);
    }

    let total: usize = all_tasks.values().map(Vec::len).sum();
    graph.status_summary.total_compilation_tasks = total;
    info!(total_tasks = total, "Compilation planning completed");

    Ok(all_tasks)
}

/// Boundaries needed to run tasks.
pub struct TaskExecution<'a> {
    pub compiler: &'a dyn CdsCompiler,
    pub project_installer: &'a dyn ProjectInstaller,
    pub diagnostics: &'a dyn DiagnosticEmitter,
    pub max_retry_attempts: u32,
}

/// Run every task sequentially, update project statuses and the summary,
/// and advance the graph to its terminal phase.
pub fn execute_compilation_tasks(
    graph: &mut CdsDependencyGraph,
    all_tasks: &mut BTreeMap<String, Vec<CompilationTask>>,
    cache_dirs: &BTreeMap<String, PathBuf>,
    execution: &TaskExecution<'_>,
) -> Result<()> {
    info!("Starting compilation execution for all projects");

    graph
        .advance_phase(ExtractionPhase::CompilationPlanning, ExtractionPhase::Compiling)
        .context("compilation cannot start")?;
    let started = Instant::now();

    let source_root = graph.source_root.clone();

    for (project_dir, tasks) in all_tasks.iter_mut() {
        if let Some(project) = graph.projects.get_mut(project_dir) {
            project.status = ProjectStatus::Compiling;
            project.timestamps.compilation_started = Some(Utc::now());
        }

        let cache_dir = cache_dirs.get(project_dir).map(PathBuf::as_path);

        for task in tasks.iter_mut() {
            run_task(graph, task, &source_root, cache_dir, execution);
        }

        if let Some(project) = graph.projects.get_mut(project_dir) {
            let has_failed_tasks = tasks.iter().any(|t| t.status == TaskStatus::Failed);
            project.status = if has_failed_tasks {
                ProjectStatus::Failed
            } else {
                ProjectStatus::Completed
            };
            project.timestamps.compilation_completed = Some(Utc::now());
        }
    }

    graph.status_summary.performance.compilation_duration_ms =
        started.elapsed().as_millis() as u64;
    graph.status_summary.performance.recompute_total();

    let has_failures = graph.status_summary.failed_compilations > 0
        || !graph.errors.critical.is_empty();
    graph.status_summary.overall_success = !has_failures;

    let terminal = if has_failures {
        ExtractionPhase::Failed
    } else {
        ExtractionPhase::Completed
    };
    graph
        .advance_phase(ExtractionPhase::Compiling, terminal)
        .context("compilation cannot finish")?;

    info!(
        successful = graph.status_summary.successful_compilations,
        failed = graph.status_summary.failed_compilations,
        "Compilation execution completed"
    );
    Ok(())
}

fn run_task(
    graph: &mut CdsDependencyGraph,
    task: &mut CompilationTask,
    source_root: &Path,
    cache_dir: Option<&Path>,
    execution: &TaskExecution<'_>,
) {
    task.status = TaskStatus::InProgress;

    let mut succeeded = attempt_compilation(task, source_root, cache_dir, execution.compiler);

    if !succeeded && execution.max_retry_attempts > 0 {
        // Escalation: the shared cache may be missing project-specific
        // dependencies, so install the project's own declared set once and
        // retry.
        warn!(
            task = %task.id,
            project = %task.project_dir,
            "Compilation failed; installing full project dependencies and retrying"
        );
        graph.status_summary.retried_compilations += 1;

        let project_path = if task.project_dir == "." {
            source_root.to_path_buf()
        } else {
            source_root.join(&task.project_dir)
        };
        if let Err(err) = execution.project_installer.install_project(&project_path) {
            warn!(
                project = %task.project_dir,
                "Project dependency installation failed: {err:#}"
            );
        }

        succeeded = attempt_compilation(task, source_root, cache_dir, execution.compiler);
    }

    if succeeded {
        task.status = TaskStatus::Success;
        graph.status_summary.successful_compilations += 1;
        graph.status_summary.json_files_generated += 1;
        return;
    }

    task.status = TaskStatus::Failed;
    let message = task.last_error();
    graph.status_summary.failed_compilations += 1;
    error!(task = %task.id, project = %task.project_dir, "Compilation failed: {message}");

    for source_file in &task.source_files {
        execution.diagnostics.emit(
            DiagnosticKind::CompilationFailure,
            &source_root.join(source_file),
            DiagnosticSeverity::Error,
            &message,
        );
    }
}

fn attempt_compilation(
    task: &mut CompilationTask,
    source_root: &Path,
    cache_dir: Option<&Path>,
    compiler: &dyn CdsCompiler,
) -> bool {
    let started_at = Utc::now();
    let started = Instant::now();

    let request = CompileRequest {
        source_root,
        project_dir: &task.project_dir,
        project_level: task.kind == TaskKind::Project,
        sources: &task.source_files,
        expected_output: &task.expected_output,
        cache_dir,
    };
    let result = compiler.compile(&request);

    let attempt = CompilationAttempt {
        cache_dir: cache_dir.map(Path::to_path_buf),
        started: started_at,
        duration_ms: started.elapsed().as_millis() as u64,
        success: result.is_ok(),
        error: result.as_ref().err().map(|err| format!("{err:#}")),
    };
    let success = attempt.success;
    task.attempts.push(attempt);
    success
}

fn model_output_path(project_dir: &str) -> String {
    if project_dir == "." {
        MODEL_CDS_JSON.to_string()
    } else {
        format!("{project_dir}/{MODEL_CDS_JSON}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use capstan_core::LogDiagnosticEmitter;
    use capstan_graph::{CdsProject, CompilationTargets};
    use std::cell::RefCell;

    struct FakeCompiler {
        /// Expected-output paths that must fail this many times before
        /// succeeding.
        failures: RefCell<BTreeMap<String, usize>>,
        invocations: RefCell<Vec<String>>,
    }

    impl FakeCompiler {
        fn succeeding() -> Self {
            Self {
                failures: RefCell::new(BTreeMap::new()),
                invocations: RefCell::new(Vec::new()),
            }
        }

        fn failing_once(output: &str) -> Self {
            let mut failures = BTreeMap::new();
            failures.insert(output.to_string(), 1);
            Self {
                failures: RefCell::new(failures),
                invocations: RefCell::new(Vec::new()),
            }
        }

        fn always_failing(output: &str) -> Self {
            let mut failures = BTreeMap::new();
            failures.insert(output.to_string(), usize::MAX);
            Self {
                failures: RefCell::new(failures),
                invocations: RefCell::new(Vec::new()),
            }
        }
    }

    impl CdsCompiler for FakeCompiler {
        fn compile(&self, request: &CompileRequest<'_>) -> Result<()> {
            self.invocations
                .borrow_mut()
                .push(request.expected_output.to_string());
            let mut failures = self.failures.borrow_mut();
            if let Some(remaining) = failures.get_mut(request.expected_output) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    bail!("compiler exploded");
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingProjectInstaller {
        installs: RefCell<Vec<PathBuf>>,
    }

    impl ProjectInstaller for RecordingProjectInstaller {
        fn install_project(&self, project_dir: &Path) -> Result<()> {
            self.installs.borrow_mut().push(project_dir.to_path_buf());
            Ok(())
        }
    }

    fn planned_graph() -> CdsDependencyGraph {
        let mut graph = CdsDependencyGraph::new("/src");
        graph
            .advance_phase(ExtractionPhase::Initializing, ExtractionPhase::Parsing)
            .unwrap();
        graph
            .advance_phase(
                ExtractionPhase::Parsing,
                ExtractionPhase::DependencyResolution,
            )
            .unwrap();

        let mut unified = CdsProject::new("cap");
        unified.cds_files = vec!["cap/db/schema.cds".into(), "cap/srv/service.cds".into()];
        unified.compilation_targets = CompilationTargets::Project;
        unified.expected_output_file = Some("cap/model.cds.json".into());
        graph.projects.insert("cap".into(), unified);

        let mut flat = CdsProject::new("flat");
        flat.cds_files = vec!["flat/a.cds".into(), "flat/b.cds".into()];
        flat.compilation_targets =
            CompilationTargets::Files(vec!["flat/a.cds".into(), "flat/b.cds".into()]);
        graph.projects.insert("flat".into(), flat);

        let mut single = CdsProject::new("one");
        single.cds_files = vec!["one/model.cds".into()];
        single.compilation_targets = CompilationTargets::Files(vec!["one/model.cds".into()]);
        single.expected_output_file = Some("one/model.cds.json".into());
        graph.projects.insert("one".into(), single);

        graph
    }

    fn execution<'a>(
        compiler: &'a FakeCompiler,
        installer: &'a RecordingProjectInstaller,
        diagnostics: &'a LogDiagnosticEmitter,
    ) -> TaskExecution<'a> {
        TaskExecution {
            compiler,
            project_installer: installer,
            diagnostics,
            max_retry_attempts: 1,
        }
    }

    #[test]
    fn test_planning_expands_targets_into_tasks() {
        let mut graph = planned_graph();
        let tasks = plan_compilation_tasks(&mut graph).unwrap();

        assert_eq!(graph.current_phase, ExtractionPhase::CompilationPlanning);
        assert_eq!(graph.status_summary.total_compilation_tasks, 4);

        let cap_tasks = &tasks["cap"];
        assert_eq!(cap_tasks.len(), 1);
        assert_eq!(cap_tasks[0].kind, TaskKind::Project);
        assert_eq!(cap_tasks[0].expected_output, "cap/model.cds.json");
        assert_eq!(cap_tasks[0].source_files.len(), 2);

        let flat_tasks = &tasks["flat"];
        assert_eq!(flat_tasks.len(), 2);
        assert!(flat_tasks.iter().all(|t| t.kind == TaskKind::File));
        assert_eq!(flat_tasks[0].expected_output, "flat/a.cds.json");

        let single_tasks = &tasks["one"];
        assert_eq!(single_tasks.len(), 1);
        assert_eq!(single_tasks[0].expected_output, "one/model.cds.json");

        for project in graph.projects.values() {
            assert_eq!(project.status, ProjectStatus::CompilationPlanned);
        }
    }

    #[test]
    fn test_planning_rejects_wrong_phase() {
        let mut graph = CdsDependencyGraph::new("/src");
        assert!(plan_compilation_tasks(&mut graph).is_err());
    }

    #[test]
    fn test_execution_success_path() {
        let mut graph = planned_graph();
        let mut tasks = plan_compilation_tasks(&mut graph).unwrap();

        let compiler = FakeCompiler::succeeding();
        let installer = RecordingProjectInstaller::default();
        let diagnostics = LogDiagnosticEmitter;
        let execution = execution(&compiler, &installer, &diagnostics);

        execute_compilation_tasks(&mut graph, &mut tasks, &BTreeMap::new(), &execution).unwrap();

        assert_eq!(graph.current_phase, ExtractionPhase::Completed);
        assert!(graph.status_summary.overall_success);
        assert_eq!(graph.status_summary.successful_compilations, 4);
        assert_eq!(graph.status_summary.failed_compilations, 0);
        assert_eq!(graph.status_summary.json_files_generated, 4);
        assert!(installer.installs.borrow().is_empty());

        for project in graph.projects.values() {
            assert_eq!(project.status, ProjectStatus::Completed);
            assert!(project.timestamps.compilation_completed.is_some());
        }
    }

    #[test]
    fn test_retry_escalation_recovers_a_task() {
        let mut graph = planned_graph();
        let mut tasks = plan_compilation_tasks(&mut graph).unwrap();

        let compiler = FakeCompiler::failing_once("cap/model.cds.json");
        let installer = RecordingProjectInstaller::default();
        let diagnostics = LogDiagnosticEmitter;
        let execution = execution(&compiler, &installer, &diagnostics);

        execute_compilation_tasks(&mut graph, &mut tasks, &BTreeMap::new(), &execution).unwrap();

        assert_eq!(graph.current_phase, ExtractionPhase::Completed);
        assert_eq!(graph.status_summary.retried_compilations, 1);
        assert_eq!(graph.status_summary.failed_compilations, 0);
        assert_eq!(
            installer.installs.borrow().as_slice(),
            &[PathBuf::from("/src/cap")]
        );

        let cap_task = &tasks["cap"][0];
        assert_eq!(cap_task.status, TaskStatus::Success);
        assert_eq!(cap_task.attempts.len(), 2);
        assert!(!cap_task.attempts[0].success);
        assert!(cap_task.attempts[1].success);
    }

    #[test]
    fn test_persistent_failure_marks_task_and_project_failed() {
        let mut graph = planned_graph();
        let mut tasks = plan_compilation_tasks(&mut graph).unwrap();

        let compiler = FakeCompiler::always_failing("flat/a.cds.json");
        let installer = RecordingProjectInstaller::default();
        let diagnostics = LogDiagnosticEmitter;
        let execution = execution(&compiler, &installer, &diagnostics);

        execute_compilation_tasks(&mut graph, &mut tasks, &BTreeMap::new(), &execution).unwrap();

        assert_eq!(graph.current_phase, ExtractionPhase::Failed);
        assert!(!graph.status_summary.overall_success);
        assert_eq!(graph.status_summary.failed_compilations, 1);
        assert_eq!(graph.status_summary.successful_compilations, 3);

        assert_eq!(tasks["flat"][0].status, TaskStatus::Failed);
        assert_eq!(graph.projects["flat"].status, ProjectStatus::Failed);
        assert_eq!(graph.projects["cap"].status, ProjectStatus::Completed);
    }

    #[test]
    fn test_cache_dir_passed_to_compiler_attempts() {
        let mut graph = planned_graph();
        let mut tasks = plan_compilation_tasks(&mut graph).unwrap();

        let compiler = FakeCompiler::succeeding();
        let installer = RecordingProjectInstaller::default();
        let diagnostics = LogDiagnosticEmitter;
        let execution = execution(&compiler, &installer, &diagnostics);

        let mut cache_dirs = BTreeMap::new();
        cache_dirs.insert("cap".to_string(), PathBuf::from("/caches/cds-abc"));

        execute_compilation_tasks(&mut graph, &mut tasks, &cache_dirs, &execution).unwrap();

        assert_eq!(
            tasks["cap"][0].attempts[0].cache_dir.as_deref(),
            Some(Path::new("/caches/cds-abc"))
        );
        assert!(tasks["flat"][0].attempts[0].cache_dir.is_none());
    }
}
