//! Full-project dependency installation, used by the compile phase's retry
//! escalation when the shared version cache was not enough.

use anyhow::{bail, Context, Result};
use capstan_core::process::run_with_timeout;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::info;

pub trait ProjectInstaller {
    fn install_project(&self, project_dir: &Path) -> Result<()>;
}

pub struct NpmProjectInstaller {
    timeout: Duration,
}

impl NpmProjectInstaller {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProjectInstaller for NpmProjectInstaller {
    fn install_project(&self, project_dir: &Path) -> Result<()> {
        if !project_dir.join("package.json").is_file() {
            bail!(
                "No package.json in {}; nothing to install",
                project_dir.display()
            );
        }

        info!(project = %project_dir.display(), "Installing full project dependencies");

        let mut command = Command::new("npm");
        command
            .args(["install", "--quiet", "--no-audit", "--no-fund"])
            .current_dir(project_dir);

        let output = run_with_timeout(&mut command, self.timeout)
            .with_context(|| format!("npm install failed in {}", project_dir.display()))?;
        if !output.success {
            bail!(
                "npm install exited with an error in {}: {}",
                project_dir.display(),
                output.stderr.trim()
            );
        }
        Ok(())
    }
}
