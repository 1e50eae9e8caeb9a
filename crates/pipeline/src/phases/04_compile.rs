use anyhow::{anyhow, Result};

use crate::context::ExtractionContext;
use crate::phase::ExtractionStep;
use crate::tasks::{self, TaskExecution};

/// Invokes the external compiler for every planned task, with the bounded
/// retry escalation on failure.
pub struct CompilePhase;

impl ExtractionStep for CompilePhase {
    fn name(&self) -> &'static str {
        "compile"
    }

    fn execute(&self, context: &mut ExtractionContext) -> Result<()> {
        let execution = TaskExecution {
            compiler: context.compiler.as_ref(),
            project_installer: context.project_installer.as_ref(),
            diagnostics: context.diagnostics.as_ref(),
            max_retry_attempts: context.config.max_retry_attempts,
        };

        let graph = context
            .graph
            .as_mut()
            .ok_or_else(|| anyhow!("compile phase requires a parsed graph"))?;

        tasks::execute_compilation_tasks(graph, &mut context.tasks, &context.cache_dirs, &execution)
    }
}
