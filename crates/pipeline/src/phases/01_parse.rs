use anyhow::{bail, Result};
use capstan_graph::{ExtractionPhase, GraphBuilder};
use tracing::info;

use crate::context::ExtractionContext;
use crate::phase::ExtractionStep;

/// Builds the dependency graph: discovery, import-edge resolution, and
/// per-project compilation targets.
pub struct ParsePhase;

impl ExtractionStep for ParsePhase {
    fn name(&self) -> &'static str {
        "parse"
    }

    fn execute(&self, context: &mut ExtractionContext) -> Result<()> {
        let graph = GraphBuilder::new(context.fs.as_ref(), context.source_root.clone()).build();

        info!(
            projects = graph.projects.len(),
            cds_files = graph.status_summary.total_cds_files,
            warnings = graph.errors.warnings.len(),
            "Dependency graph built"
        );

        let failed = graph.current_phase == ExtractionPhase::Failed;
        context.graph = Some(graph);

        if failed {
            bail!("dependency graph construction failed; aborting the run");
        }
        Ok(())
    }
}
