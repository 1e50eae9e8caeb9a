use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable status report.
    Text,
    /// The full dependency graph as JSON.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "capstan",
    version,
    about = "Discovers CAP/CDS projects, resolves their compiler dependencies, and drives compilation to JSON"
)]
pub struct CliArgs {
    /// Source root directory to scan for CDS projects.
    pub source_root: PathBuf,

    /// Output format for the run result.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Explicit log level (trace, debug, info, warn, error); overrides
    /// --verbose/--quiet and CAPSTAN_LOG_LEVEL.
    #[arg(long)]
    pub log_level: Option<String>,
}
