//! Human-readable status report rendered at the end of a run.

use capstan_graph::CdsDependencyGraph;

const RULE: &str =
    "================================================================================";

pub fn generate_status_report(graph: &CdsDependencyGraph) -> String {
    let summary = &graph.status_summary;
    let mut lines: Vec<String> = Vec::new();

    lines.push(RULE.to_string());
    lines.push("CDS EXTRACTION STATUS REPORT".to_string());
    lines.push(RULE.to_string());
    lines.push(String::new());

    lines.push("OVERALL SUMMARY:".to_string());
    lines.push(format!(
        "  Status: {}",
        if summary.overall_success {
            "SUCCESS"
        } else {
            "FAILED"
        }
    ));
    lines.push(format!(
        "  Current Phase: {}",
        graph.current_phase.to_string().to_uppercase()
    ));
    lines.push(format!("  Projects: {}", summary.total_projects));
    lines.push(format!("  CDS Files: {}", summary.total_cds_files));
    lines.push(format!(
        "  JSON Files Generated: {}",
        summary.json_files_generated
    ));
    lines.push(String::new());

    lines.push("COMPILATION SUMMARY:".to_string());
    lines.push(format!("  Total Tasks: {}", summary.total_compilation_tasks));
    lines.push(format!("  Successful: {}", summary.successful_compilations));
    lines.push(format!("  Failed: {}", summary.failed_compilations));
    lines.push(format!("  Skipped: {}", summary.skipped_compilations));
    lines.push(format!("  Retried: {}", summary.retried_compilations));
    lines.push(String::new());

    lines.push("PERFORMANCE:".to_string());
    lines.push(format!(
        "  Total Duration: {}ms",
        summary.performance.total_duration_ms
    ));
    lines.push(format!(
        "  Parsing: {}ms",
        summary.performance.parsing_duration_ms
    ));
    lines.push(format!(
        "  Compilation: {}ms",
        summary.performance.compilation_duration_ms
    ));
    lines.push(format!(
        "  Extraction: {}ms",
        summary.performance.extraction_duration_ms
    ));
    lines.push(String::new());

    if !graph.errors.critical.is_empty() {
        lines.push("CRITICAL ERRORS:".to_string());
        for error in &graph.errors.critical {
            lines.push(format!("  - [{}] {}", error.phase, error.message));
        }
        lines.push(String::new());
    }

    if !graph.errors.warnings.is_empty() {
        lines.push("WARNINGS:".to_string());
        for warning in &graph.errors.warnings {
            lines.push(format!("  - [{}] {}", warning.phase, warning.message));
        }
        lines.push(String::new());
    }

    lines.push(RULE.to_string());
    lines.join("\n")
}
