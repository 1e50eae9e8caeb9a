//! Project boundary detection.
//!
//! A "project" is the largest directory subtree the planner treats as one
//! compilation unit. Detection starts from two signals — `package.json`
//! descriptors and the `.cds` files themselves — and reconciles overlapping
//! candidates so that every CDS file ends up owned by exactly one project.

use anyhow::{bail, Result};
use capstan_core::FileSystem;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::PackageDescriptor;
use crate::{NODE_MODULES_DIR, TEST_PROJECT_SUFFIX};

/// Conventional CAP subdirectory names.
pub(crate) const STANDARD_CAP_DIRS: [&str; 3] = ["db", "srv", "app"];

/// Whether a path crosses an installed-dependency or test-fixture directory.
pub(crate) fn is_excluded_path(path: &Path) -> bool {
    path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name == NODE_MODULES_DIR || name.ends_with(TEST_PROJECT_SUFFIX)
    })
}

/// Parse a `package.json` file, tolerating absence and malformed content.
pub fn read_package_descriptor(fs: &dyn FileSystem, path: &Path) -> Option<PackageDescriptor> {
    if !fs.is_file(path) {
        return None;
    }

    let content = match fs.read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Error reading package.json at {}: {}", path.display(), err);
            return None;
        }
    };

    match serde_json::from_str::<PackageDescriptor>(&content) {
        Ok(descriptor) => Some(descriptor),
        Err(err) => {
            warn!("Error parsing package.json at {}: {}", path.display(), err);
            None
        }
    }
}

/// Whether any of `db/`, `srv/`, `app/` under `dir` contains a CDS file at
/// any depth.
pub(crate) fn has_standard_cds_content(fs: &dyn FileSystem, dir: &Path) -> bool {
    STANDARD_CAP_DIRS.iter().any(|sub| {
        let location = dir.join(sub);
        if !fs.is_dir(&location) {
            return false;
        }
        fs.walk_files(&location)
            .map(|files| {
                files
                    .iter()
                    .any(|f| !is_excluded_path(f) && has_cds_extension(f))
            })
            .unwrap_or(false)
    })
}

/// Whether `dir` itself (non-recursively) contains a CDS file.
pub(crate) fn has_direct_cds_content(fs: &dyn FileSystem, dir: &Path) -> bool {
    fs.read_dir(dir)
        .map(|entries| {
            entries
                .iter()
                .any(|e| e.is_file() && has_cds_extension(&e.path))
        })
        .unwrap_or(false)
}

/// Whether a directory is worth treating as a CDS project.
///
/// CAP dependencies in a descriptor are not enough on their own: a
/// dependency-only descriptor leaves nothing to compile, and a workspace
/// root only counts when it has CDS content of its own. Both reduce to the
/// same test — there must be CDS content in a standard CAP subdirectory or
/// directly in the directory.
pub(crate) fn is_likely_cds_project(fs: &dyn FileSystem, dir: &Path) -> bool {
    if is_excluded_path(dir) {
        return false;
    }
    has_standard_cds_content(fs, dir) || has_direct_cds_content(fs, dir)
}

/// Whether `dir` owns a `db`+`srv` or `srv`+`app` sibling pair.
fn has_cap_sibling_pair(fs: &dyn FileSystem, dir: &Path) -> bool {
    let has_db = fs.is_dir(&dir.join("db"));
    let has_srv = fs.is_dir(&dir.join("srv"));
    let has_app = fs.is_dir(&dir.join("app"));
    (has_db && has_srv) || (has_srv && has_app)
}

/// Walk upward from the directory of a CDS file looking for its real
/// project root. The search never leaves `source_root`; when nothing better
/// is found the file's own directory stands.
fn find_project_root_for_cds_file(
    fs: &dyn FileSystem,
    cds_file_dir: &Path,
    source_root: &Path,
) -> PathBuf {
    if is_excluded_path(cds_file_dir) {
        return cds_file_dir.to_path_buf();
    }

    let mut current = cds_file_dir.to_path_buf();
    loop {
        if is_likely_cds_project(fs, &current) {
            let dir_name = current
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();

            // A standard CAP subdirectory is owned by its parent when the
            // parent is itself a project.
            if STANDARD_CAP_DIRS.contains(&dir_name) {
                if let Some(parent) = current.parent() {
                    if parent.starts_with(source_root)
                        && !is_excluded_path(parent)
                        && is_likely_cds_project(fs, parent)
                    {
                        return parent.to_path_buf();
                    }
                }
            }

            // Even for non-standard subdirectories, a parent with the
            // conventional CAP layout is the better root.
            if let Some(parent) = current.parent() {
                if parent.starts_with(source_root)
                    && !is_excluded_path(parent)
                    && has_cap_sibling_pair(fs, parent)
                {
                    return parent.to_path_buf();
                }
            }

            return current;
        }

        if has_cap_sibling_pair(fs, &current) {
            return current;
        }

        if current == source_root {
            break;
        }
        match current.parent() {
            Some(parent) if parent.starts_with(source_root) => current = parent.to_path_buf(),
            _ => break,
        }
    }

    cds_file_dir.to_path_buf()
}

/// Determine the distinct CDS projects under a source root.
///
/// Returns sorted source-root-relative directory paths, `.` standing for
/// the source root itself. Errors only on invalid preconditions (empty or
/// missing source root); an empty tree yields an empty list.
pub fn determine_cds_projects_under_source_dir(
    fs: &dyn FileSystem,
    source_root: &Path,
) -> Result<Vec<String>> {
    if source_root.as_os_str().is_empty() {
        bail!("Source root must not be empty");
    }
    if !fs.is_dir(source_root) {
        bail!(
            "Source root directory '{}' does not exist",
            source_root.display()
        );
    }

    let all_files: Vec<PathBuf> = fs
        .walk_files(source_root)?
        .into_iter()
        .filter(|f| !is_excluded_path(f))
        .collect();

    let mut candidates: BTreeSet<PathBuf> = BTreeSet::new();

    for file in &all_files {
        if file.file_name().and_then(|n| n.to_str()) == Some("package.json") {
            if let Some(dir) = file.parent() {
                candidates.insert(dir.to_path_buf());
            }
        }
    }

    for file in &all_files {
        if !has_cds_extension(file) {
            continue;
        }
        if let Some(dir) = file.parent() {
            candidates.insert(find_project_root_for_cds_file(fs, dir, source_root));
        }
    }

    let qualifying: BTreeSet<PathBuf> = candidates
        .into_iter()
        .filter(|dir| is_likely_cds_project(fs, dir))
        .collect();

    // Reconcile overlaps with one deterministic rule: a candidate inside
    // another qualifying candidate is absorbed into that ancestor, unless
    // the ancestor is a multi-package workspace root, in which case the
    // nested project stands on its own. Workspace roots without CDS content
    // of their own never reach this point — `is_likely_cds_project` already
    // dropped them.
    let mut surviving: Vec<&PathBuf> = Vec::new();
    for dir in &qualifying {
        let absorbed = qualifying.iter().any(|ancestor| {
            ancestor != dir && dir.starts_with(ancestor) && !is_workspace_root_dir(fs, ancestor)
        });
        if !absorbed {
            surviving.push(dir);
        }
    }

    Ok(surviving
        .into_iter()
        .map(|dir| to_project_key(source_root, dir))
        .collect())
}

/// Enumerate the CDS files belonging to a project directory, as sorted
/// source-root-relative paths. Nested sibling projects are not subtracted
/// here; the graph builder owns that partition step.
pub fn determine_cds_files_for_project_dir(
    fs: &dyn FileSystem,
    source_root: &Path,
    project_dir: &Path,
) -> Result<Vec<String>> {
    if source_root.as_os_str().is_empty() || project_dir.as_os_str().is_empty() {
        bail!(
            "Unable to determine CDS files for project dir '{}'; both source root and project dir must be provided",
            project_dir.display()
        );
    }
    if !project_dir.starts_with(source_root) {
        bail!("Project dir must be under the source root, or equal to it");
    }

    let files = fs.walk_files(project_dir)?;
    Ok(files
        .into_iter()
        .filter(|f| has_cds_extension(f) && !is_excluded_path(f))
        .map(|f| to_rel_string(source_root, &f))
        .collect())
}

fn is_workspace_root_dir(fs: &dyn FileSystem, dir: &Path) -> bool {
    read_package_descriptor(fs, &dir.join("package.json"))
        .map(|descriptor| descriptor.is_workspace_root())
        .unwrap_or(false)
}

fn has_cds_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("cds")
}

fn to_project_key(source_root: &Path, dir: &Path) -> String {
    let rel = to_rel_string(source_root, dir);
    if rel.is_empty() {
        ".".to_string()
    } else {
        rel
    }
}

pub(crate) fn to_rel_string(source_root: &Path, path: &Path) -> String {
    path.strip_prefix(source_root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
