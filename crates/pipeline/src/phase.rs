use anyhow::Result;
use capstan_graph::{CdsDependencyGraph, ExtractionPhase};
use std::time::Instant;
use tracing::{error, info};

use crate::context::ExtractionContext;
use crate::phases::{
    compile::CompilePhase, install::InstallPhase, parse::ParsePhase, plan::PlanPhase,
    report::ReportPhase,
};

/// One sequential step of the extraction pipeline.
pub trait ExtractionStep {
    fn name(&self) -> &'static str;

    fn execute(&self, context: &mut ExtractionContext) -> Result<()>;
}

pub struct ExtractionPipeline;

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionPipeline {
    pub fn new() -> Self {
        Self
    }

    /// Run all phases in order. A failing phase stops the pipeline; the
    /// graph built so far (annotated with the failure) is always returned
    /// so the caller can report and decide.
    pub fn execute(&self, context: &mut ExtractionContext) -> CdsDependencyGraph {
        let started = Instant::now();
        info!(
            source_root = %context.source_root.display(),
            "Starting CDS extraction pipeline"
        );

        let steps: Vec<Box<dyn ExtractionStep>> = vec![
            Box::new(ParsePhase),
            Box::new(InstallPhase),
            Box::new(PlanPhase),
            Box::new(CompilePhase),
            Box::new(ReportPhase),
        ];

        for step in steps {
            let step_name = step.name();
            info!(phase = step_name, "Starting phase");

            let phase_start = Instant::now();
            if let Err(err) = step.execute(context) {
                error!(phase = step_name, "Phase failed: {err:#}");
                match context.graph.as_mut() {
                    Some(graph) if graph.current_phase != ExtractionPhase::Failed => {
                        graph.record_critical(format!("Phase {step_name} failed: {err:#}"));
                    }
                    Some(_) => {}
                    None => {
                        let mut graph = CdsDependencyGraph::new(context.source_root.clone());
                        graph.record_critical(format!("Phase {step_name} failed: {err:#}"));
                        context.graph = Some(graph);
                    }
                }
                break;
            }

            info!(
                phase = step_name,
                duration_ms = phase_start.elapsed().as_millis() as u64,
                "Phase complete"
            );
        }

        let graph = context.graph.take().unwrap_or_else(|| {
            let mut graph = CdsDependencyGraph::new(context.source_root.clone());
            graph.record_critical("Pipeline produced no dependency graph");
            graph
        });

        info!(
            projects = graph.projects.len(),
            total_time_ms = started.elapsed().as_millis() as u64,
            "Extraction pipeline finished"
        );

        graph
    }
}
