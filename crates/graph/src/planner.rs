//! Compilation-target planning.
//!
//! CAP's compiler resolves a whole project's namespace graph when given the
//! project as context, so genuinely CAP-structured projects are compiled as
//! one unified build. Flat trees lack that guarantee and are compiled at
//! their entry points only.

use capstan_core::FileSystem;
use std::collections::BTreeSet;
use std::path::Path;

use crate::discovery::is_likely_cds_project;
use crate::model::{CdsProject, CompilationTargets};
use crate::{CDS_PACKAGE, MODEL_CDS_JSON};

/// Outcome of planning one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationPlan {
    pub targets: CompilationTargets,
    /// Set for unified and single-file builds; per-file plans derive one
    /// `<file>.json` per target instead.
    pub expected_output_file: Option<String>,
}

/// Decide what the compiler should be handed for `project`.
///
/// Never fails: ambiguous layouts degrade to compiling every file
/// individually rather than producing no targets.
pub fn determine_files_to_compile(
    fs: &dyn FileSystem,
    source_root: &Path,
    project: &CdsProject,
) -> CompilationPlan {
    if project.cds_files.is_empty() {
        return CompilationPlan {
            targets: CompilationTargets::Files(Vec::new()),
            expected_output_file: None,
        };
    }

    if project.cds_files.len() == 1 {
        return CompilationPlan {
            targets: CompilationTargets::Files(project.cds_files.clone()),
            expected_output_file: Some(model_output_path(&project.project_dir)),
        };
    }

    if is_cap_structured(fs, source_root, project) {
        return CompilationPlan {
            targets: CompilationTargets::Project,
            expected_output_file: Some(model_output_path(&project.project_dir)),
        };
    }

    // Flat or ambiguous layout: compile the import roots individually.
    let imported: BTreeSet<&str> = project
        .imports
        .values()
        .flatten()
        .filter(|import| import.is_relative)
        .filter_map(|import| import.resolved_path.as_deref())
        .filter(|resolved| project.cds_files.iter().any(|f| f == resolved))
        .collect();

    let roots: Vec<String> = project
        .cds_files
        .iter()
        .filter(|file| !imported.contains(file.as_str()))
        .cloned()
        .collect();

    if roots.is_empty() {
        // Cyclic or fully interlinked imports: compile everything.
        return CompilationPlan {
            targets: CompilationTargets::Files(project.cds_files.clone()),
            expected_output_file: None,
        };
    }

    CompilationPlan {
        targets: CompilationTargets::Files(roots),
        expected_output_file: None,
    }
}

/// Whether the project shows the conventional CAP shape: sources split
/// across database and service tiers, or an explicit compiler dependency on
/// a directory that independently looks like a CDS project.
fn is_cap_structured(fs: &dyn FileSystem, source_root: &Path, project: &CdsProject) -> bool {
    let mut has_db_tier = false;
    let mut has_srv_tier = false;

    for file in &project.cds_files {
        for segment in segments_within_project(&project.project_dir, file) {
            match segment {
                "db" | "database" => has_db_tier = true,
                "srv" | "service" => has_srv_tier = true,
                _ => {}
            }
        }
    }

    if has_db_tier && has_srv_tier {
        return true;
    }

    let declares_compiler = project
        .package_json
        .as_ref()
        .map(|descriptor| descriptor.declared_range(CDS_PACKAGE).is_some())
        .unwrap_or(false);

    declares_compiler && is_likely_cds_project(fs, &absolute_project_dir(source_root, project))
}

/// Directory segments of a file path, relative to its project directory
/// and excluding the file name itself.
fn segments_within_project<'a>(project_dir: &str, file: &'a str) -> Vec<&'a str> {
    let within = if project_dir == "." {
        file
    } else {
        file.strip_prefix(project_dir)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(file)
    };

    let mut segments: Vec<&str> = within.split('/').collect();
    segments.pop();
    segments
}

fn absolute_project_dir(source_root: &Path, project: &CdsProject) -> std::path::PathBuf {
    if project.project_dir == "." {
        source_root.to_path_buf()
    } else {
        source_root.join(&project.project_dir)
    }
}

fn model_output_path(project_dir: &str) -> String {
    if project_dir == "." {
        MODEL_CDS_JSON.to_string()
    } else {
        format!("{}/{}", project_dir, MODEL_CDS_JSON)
    }
}
