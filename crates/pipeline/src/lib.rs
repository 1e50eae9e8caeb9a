//! Sequential extraction pipeline.
//!
//! Phases run strictly in order — parse, install, plan, compile, report —
//! because each consumes the complete result set of the previous one.
//! External collaborators (compiler, package manager, diagnostics) sit
//! behind traits on the [`ExtractionContext`].

pub mod compiler;
pub mod context;
pub mod phase;
pub mod phases;
pub mod project_install;
pub mod report;
pub mod tasks;

pub use compiler::{CdsCompiler, CliCdsCompiler, CompileRequest};
pub use context::ExtractionContext;
pub use phase::{ExtractionPipeline, ExtractionStep};
pub use project_install::{NpmProjectInstaller, ProjectInstaller};
pub use tasks::{CompilationTask, TaskKind, TaskStatus};
