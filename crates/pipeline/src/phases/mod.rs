// Pipeline phases for the staged CDS extraction run. Each phase is
// self-contained and communicates only through the ExtractionContext.

#[path = "01_parse.rs"]
pub mod parse;

#[path = "02_install.rs"]
pub mod install;

#[path = "03_plan.rs"]
pub mod plan;

#[path = "04_compile.rs"]
pub mod compile;

#[path = "05_report.rs"]
pub mod report;
