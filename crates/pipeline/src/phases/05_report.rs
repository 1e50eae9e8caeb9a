use anyhow::{anyhow, Result};
use tracing::info;

use crate::context::ExtractionContext;
use crate::phase::ExtractionStep;
use crate::report::generate_status_report;

/// Logs the final status report.
pub struct ReportPhase;

impl ExtractionStep for ReportPhase {
    fn name(&self) -> &'static str {
        "report"
    }

    fn execute(&self, context: &mut ExtractionContext) -> Result<()> {
        let graph = context
            .graph
            .as_ref()
            .ok_or_else(|| anyhow!("report phase requires a parsed graph"))?;

        info!("Final status report:\n{}", generate_status_report(graph));
        Ok(())
    }
}
