//! Boundary for reporting diagnostics to an external recording tool.
//!
//! The core only ever supplies a file path, a severity, and a markdown
//! message; the concrete emitter decides where those end up.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

use crate::process::run_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Note,
}

impl DiagnosticSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Note => "note",
        }
    }
}

/// The kind of event being reported; emitters map this to their own
/// source identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    DependencyVersionFallback,
    CompilationFailure,
}

impl DiagnosticKind {
    pub fn source_id(&self) -> &'static str {
        match self {
            DiagnosticKind::DependencyVersionFallback => "cds/dependency-version-fallback",
            DiagnosticKind::CompilationFailure => "cds/compilation-failure",
        }
    }

    pub fn source_name(&self) -> &'static str {
        match self {
            DiagnosticKind::DependencyVersionFallback => {
                "Using fallback versions for SAP CAP CDS dependencies"
            }
            DiagnosticKind::CompilationFailure => "Failure to compile one or more SAP CAP CDS files",
        }
    }
}

pub trait DiagnosticEmitter: Send + Sync {
    /// Report one event. Returns whether the external recorder accepted it;
    /// a `false` return is non-fatal to the caller.
    fn emit(
        &self,
        kind: DiagnosticKind,
        file_path: &Path,
        severity: DiagnosticSeverity,
        markdown_message: &str,
    ) -> bool;
}

/// Emitter that only writes to the log. Used when no external recorder is
/// configured, and as the default in tests.
pub struct LogDiagnosticEmitter;

impl DiagnosticEmitter for LogDiagnosticEmitter {
    fn emit(
        &self,
        kind: DiagnosticKind,
        file_path: &Path,
        severity: DiagnosticSeverity,
        markdown_message: &str,
    ) -> bool {
        warn!(
            source = kind.source_id(),
            severity = severity.as_str(),
            file = %file_path.display(),
            "{}",
            markdown_message
        );
        true
    }
}

/// Records diagnostics in a CodeQL database via
/// `codeql database add-diagnostic`.
pub struct CodeqlDiagnosticEmitter {
    codeql_exe: PathBuf,
    wip_database: String,
    timeout: Duration,
}

impl CodeqlDiagnosticEmitter {
    pub fn new(
        codeql_exe: impl Into<PathBuf>,
        wip_database: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            codeql_exe: codeql_exe.into(),
            wip_database: wip_database.into(),
            timeout,
        }
    }
}

impl DiagnosticEmitter for CodeqlDiagnosticEmitter {
    fn emit(
        &self,
        kind: DiagnosticKind,
        file_path: &Path,
        severity: DiagnosticSeverity,
        markdown_message: &str,
    ) -> bool {
        let mut command = Command::new(&self.codeql_exe);
        command
            .arg("database")
            .arg("add-diagnostic")
            .arg("--extractor-name=cds")
            .arg("--ready-for-status-page")
            .arg(format!("--source-id={}", kind.source_id()))
            .arg(format!("--source-name={}", kind.source_name()))
            .arg(format!("--severity={}", severity.as_str()))
            .arg(format!("--markdown-message={markdown_message}"))
            .arg(format!("--file-path={}", file_path.display()))
            .arg("--")
            .arg(&self.wip_database);

        match run_with_timeout(&mut command, self.timeout) {
            Ok(output) if output.success => {
                info!(
                    source = kind.source_id(),
                    file = %file_path.display(),
                    "Added diagnostic"
                );
                true
            }
            Ok(output) => {
                warn!(
                    source = kind.source_id(),
                    file = %file_path.display(),
                    "Failed to add diagnostic: {}",
                    output.stderr.trim()
                );
                false
            }
            Err(err) => {
                warn!(
                    source = kind.source_id(),
                    file = %file_path.display(),
                    "Failed to add diagnostic: {err:#}"
                );
                false
            }
        }
    }
}
