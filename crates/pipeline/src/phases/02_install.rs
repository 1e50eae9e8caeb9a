use anyhow::{anyhow, Result};
use capstan_registry::CacheInstaller;
use tracing::info;

use crate::context::ExtractionContext;
use crate::phase::ExtractionStep;

/// Resolves each project's dependency versions and installs one shared
/// cache directory per unique resolved combination.
pub struct InstallPhase;

impl ExtractionStep for InstallPhase {
    fn name(&self) -> &'static str {
        "install"
    }

    fn execute(&self, context: &mut ExtractionContext) -> Result<()> {
        let graph = context
            .graph
            .as_ref()
            .ok_or_else(|| anyhow!("install phase requires a parsed graph"))?;

        let mut installer = CacheInstaller::new(
            context.registry.as_ref(),
            context.installer.as_ref(),
            context.diagnostics.as_ref(),
            context.config.cache_dir_name.clone(),
        );
        context.cache_dirs = installer.install_for_graph(graph, &context.source_root);

        info!(
            mapped_projects = context.cache_dirs.len(),
            "Dependency cache installation finished"
        );
        Ok(())
    }
}
