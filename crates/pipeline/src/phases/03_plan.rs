use anyhow::{anyhow, Result};

use crate::context::ExtractionContext;
use crate::phase::ExtractionStep;
use crate::tasks;

/// Expands each project's compilation targets into concrete tasks and
/// advances the graph to `compilation_planning`.
pub struct PlanPhase;

impl ExtractionStep for PlanPhase {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn execute(&self, context: &mut ExtractionContext) -> Result<()> {
        let graph = context
            .graph
            .as_mut()
            .ok_or_else(|| anyhow!("plan phase requires a parsed graph"))?;

        context.tasks = tasks::plan_compilation_tasks(graph)?;
        Ok(())
    }
}
