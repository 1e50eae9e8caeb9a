pub mod config;
pub mod diagnostics;
pub mod fs;
pub mod process;

pub use config::{CapstanConfig, ConfigError};
pub use diagnostics::{
    CodeqlDiagnosticEmitter, DiagnosticEmitter, DiagnosticKind, DiagnosticSeverity,
    LogDiagnosticEmitter,
};
pub use fs::{FileSystem, MockFileSystem, RealFileSystem};
pub use process::{run_with_timeout, CommandOutput};
