//! Boundary to the external CDS compiler.
//!
//! Capstan never parses CDS semantics itself; it shells out to the `cds`
//! CLI. The trait keeps the rest of the pipeline testable without a Node.js
//! toolchain on the machine.

use anyhow::{bail, Context, Result};
use capstan_core::process::run_with_timeout;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct CompileRequest<'a> {
    pub source_root: &'a Path,
    /// Source-root-relative project directory (`.` for the root).
    pub project_dir: &'a str,
    /// Unified project build (hand the compiler the project directory)
    /// versus individual file compilation.
    pub project_level: bool,
    /// Source-root-relative input files.
    pub sources: &'a [String],
    /// Source-root-relative output artifact path.
    pub expected_output: &'a str,
    /// Dependency cache directory to resolve `@sap/cds` from, if mapped.
    pub cache_dir: Option<&'a Path>,
}

pub trait CdsCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<()>;
}

/// Invokes `cds compile` as a subprocess, preferring the binary installed
/// in the request's cache directory over whatever is on the PATH.
pub struct CliCdsCompiler {
    timeout: Duration,
}

impl CliCdsCompiler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn cds_program(cache_dir: Option<&Path>) -> PathBuf {
        if let Some(cache_dir) = cache_dir {
            let cached_bin = cache_dir.join("node_modules/.bin/cds");
            if cached_bin.is_file() {
                return cached_bin;
            }
        }
        PathBuf::from("cds")
    }
}

impl CdsCompiler for CliCdsCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<()> {
        let mut command = Command::new(Self::cds_program(request.cache_dir));
        command.arg("compile");

        if request.project_level {
            command.arg(request.project_dir);
        } else {
            for source in request.sources {
                command.arg(source);
            }
        }

        command
            .args(["--to", "json", "--dest", request.expected_output])
            .args(["--locations", "--log-level", "warn"])
            .current_dir(request.source_root);

        if let Some(cache_dir) = request.cache_dir {
            let node_modules = cache_dir.join("node_modules");
            command.env(
                "NODE_PATH",
                prepend_path(node_modules.clone(), env::var_os("NODE_PATH")),
            );
            command.env(
                "PATH",
                prepend_path(node_modules.join(".bin"), env::var_os("PATH")),
            );
            command.env("npm_config_prefix", cache_dir);
        }

        debug!(
            project = request.project_dir,
            output = request.expected_output,
            "Invoking CDS compiler"
        );

        let output = run_with_timeout(&mut command, self.timeout).with_context(|| {
            format!("CDS compiler invocation failed for {}", request.project_dir)
        })?;
        if !output.success {
            bail!(
                "Could not compile {}:\n{}",
                request.project_dir,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

fn prepend_path(head: PathBuf, existing: Option<OsString>) -> OsString {
    let mut parts = vec![head];
    if let Some(existing) = existing {
        parts.extend(env::split_paths(&existing));
    }
    env::join_paths(parts).unwrap_or_default()
}
