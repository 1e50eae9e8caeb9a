//! Resolution of declared `@sap/cds` / `@sap/cds-dk` ranges against the
//! published version lists.

use anyhow::{bail, Context, Result};
use capstan_core::process::run_with_timeout;
use capstan_graph::{CDS_DK_PACKAGE, CDS_PACKAGE};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::semver::{find_best_available_version, parse_semantic_version, satisfies_range};

/// Source of published version lists for npm packages.
pub trait PackageRegistry {
    fn available_versions(&self, package_name: &str) -> Result<Vec<String>>;
}

/// Queries the registry through the `npm view` command.
pub struct NpmRegistry {
    timeout: Duration,
}

impl NpmRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PackageRegistry for NpmRegistry {
    fn available_versions(&self, package_name: &str) -> Result<Vec<String>> {
        let mut command = Command::new("npm");
        command.args(["view", package_name, "versions", "--json"]);

        let output = run_with_timeout(&mut command, self.timeout)
            .with_context(|| format!("npm view failed for {package_name}"))?;
        if !output.success {
            bail!(
                "npm view {} exited with an error: {}",
                package_name,
                output.stderr.trim()
            );
        }

        // npm prints a JSON array, or a bare string for single-version
        // packages.
        let value: Value = serde_json::from_str(&output.stdout)
            .with_context(|| format!("Unparseable npm view output for {package_name}"))?;

        Ok(match value {
            Value::Array(entries) => entries
                .into_iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect(),
            Value::String(single) => vec![single],
            _ => Vec::new(),
        })
    }
}

/// Outcome of resolving the compiler/toolkit version pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCdsVersions {
    pub resolved_cds_version: Option<String>,
    pub resolved_cds_dk_version: Option<String>,
    pub cds_exact_match: bool,
    pub cds_dk_exact_match: bool,
    /// Concatenated per-package fallback notes and the cross-package
    /// compatibility note, when any apply.
    pub warning: Option<String>,
    /// True when either resolution could not satisfy its requested range.
    pub is_fallback: bool,
}

struct Compatibility {
    is_compatible: bool,
    warning: Option<String>,
}

/// Resolves version ranges with a per-package version-list cache that lives
/// as long as the resolver itself, so repeated lookups across many projects
/// query the registry once per package.
pub struct VersionResolver<'r> {
    registry: &'r dyn PackageRegistry,
    version_cache: HashMap<String, Vec<String>>,
}

impl<'r> VersionResolver<'r> {
    pub fn new(registry: &'r dyn PackageRegistry) -> Self {
        Self {
            registry,
            version_cache: HashMap::new(),
        }
    }

    /// Published versions for a package. Registry failures are cached as an
    /// empty list so one unreachable registry does not retry per project.
    pub fn available_versions(&mut self, package_name: &str) -> Vec<String> {
        if let Some(cached) = self.version_cache.get(package_name) {
            debug!(package = package_name, "Version list cache hit");
            return cached.clone();
        }

        let versions = match self.registry.available_versions(package_name) {
            Ok(versions) => versions,
            Err(err) => {
                warn!("Failed to fetch versions for {package_name}: {err:#}");
                Vec::new()
            }
        };

        self.version_cache
            .insert(package_name.to_string(), versions.clone());
        versions
    }

    /// Resolve the best available versions for the requested compiler and
    /// toolkit ranges.
    pub fn resolve_cds_versions(
        &mut self,
        cds_range: &str,
        cds_dk_range: &str,
    ) -> ResolvedCdsVersions {
        let cds_versions = self.available_versions(CDS_PACKAGE);
        let cds_dk_versions = self.available_versions(CDS_DK_PACKAGE);

        let resolved_cds = find_best_available_version(&cds_versions, cds_range);
        let resolved_cds_dk = find_best_available_version(&cds_dk_versions, cds_dk_range);

        let cds_exact_match = resolved_cds.as_deref() == Some(cds_range)
            || (cds_range == "latest" && resolved_cds.is_some());
        let cds_dk_exact_match = resolved_cds_dk.as_deref() == Some(cds_dk_range)
            || (cds_dk_range == "latest" && resolved_cds_dk.is_some());

        let cds_satisfies = resolved_cds
            .as_deref()
            .map(|resolved| is_satisfying_version(resolved, cds_range))
            .unwrap_or(false);
        let cds_dk_satisfies = resolved_cds_dk
            .as_deref()
            .map(|resolved| is_satisfying_version(resolved, cds_dk_range))
            .unwrap_or(false);

        let is_fallback = !cds_satisfies || !cds_dk_satisfies;

        let mut notes: Vec<String> = Vec::new();
        if let Some(resolved) = resolved_cds.as_deref() {
            if !cds_satisfies {
                notes.push(format!(
                    "No published version of {CDS_PACKAGE} satisfies '{cds_range}'; using highest available {resolved}"
                ));
            }
        }
        if let Some(resolved) = resolved_cds_dk.as_deref() {
            if !cds_dk_satisfies {
                notes.push(format!(
                    "No published version of {CDS_DK_PACKAGE} satisfies '{cds_dk_range}'; using highest available {resolved}"
                ));
            }
        }
        if let (Some(cds), Some(cds_dk)) = (resolved_cds.as_deref(), resolved_cds_dk.as_deref()) {
            let compatibility = check_version_compatibility(cds, cds_dk);
            if let Some(note) = compatibility.warning {
                notes.push(note);
            }
            if !compatibility.is_compatible {
                info!(
                    cds = cds,
                    cds_dk = cds_dk,
                    "Resolved CDS versions may be incompatible"
                );
            }
        }

        ResolvedCdsVersions {
            resolved_cds_version: resolved_cds,
            resolved_cds_dk_version: resolved_cds_dk,
            cds_exact_match,
            cds_dk_exact_match,
            warning: if notes.is_empty() {
                None
            } else {
                Some(notes.join("; "))
            },
            is_fallback,
        }
    }
}

/// Whether a concrete resolved version satisfies the originally requested
/// range (string equality and `latest` short-circuit included).
fn is_satisfying_version(resolved: &str, requested: &str) -> bool {
    if resolved == requested || requested == "latest" {
        return true;
    }
    match parse_semantic_version(resolved) {
        Some(parsed) => satisfies_range(&parsed, requested),
        None => false,
    }
}

/// Cross-package compatibility: same major and minor is clean, same major
/// with minor drift warns, a major mismatch is flagged incompatible.
fn check_version_compatibility(cds_version: &str, cds_dk_version: &str) -> Compatibility {
    if cds_version == "latest" || cds_dk_version == "latest" {
        return Compatibility {
            is_compatible: true,
            warning: None,
        };
    }

    let (parsed_cds, parsed_cds_dk) = match (
        parse_semantic_version(cds_version),
        parse_semantic_version(cds_dk_version),
    ) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Compatibility {
                is_compatible: false,
                warning: Some("Unable to parse version numbers for compatibility check".to_string()),
            }
        }
    };

    if parsed_cds.major != parsed_cds_dk.major {
        return Compatibility {
            is_compatible: false,
            warning: Some(format!(
                "Major version mismatch: {CDS_PACKAGE} {cds_version} and {CDS_DK_PACKAGE} {cds_dk_version} may not be compatible"
            )),
        };
    }

    if parsed_cds.minor != parsed_cds_dk.minor {
        return Compatibility {
            is_compatible: true,
            warning: Some(format!(
                "Minor version difference: {CDS_PACKAGE} {cds_version} and {CDS_DK_PACKAGE} {cds_dk_version} - consider aligning versions"
            )),
        };
    }

    Compatibility {
        is_compatible: true,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Registry fake returning canned version lists and counting queries.
    pub(crate) struct FakeRegistry {
        versions: HashMap<String, Vec<String>>,
        pub calls: RefCell<Vec<String>>,
        pub fail: bool,
    }

    impl FakeRegistry {
        pub(crate) fn with_versions(versions: &[&str]) -> Self {
            let list: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
            let mut map = HashMap::new();
            map.insert(CDS_PACKAGE.to_string(), list.clone());
            map.insert(CDS_DK_PACKAGE.to_string(), list);
            Self {
                versions: map,
                calls: RefCell::new(Vec::new()),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                versions: HashMap::new(),
                calls: RefCell::new(Vec::new()),
                fail: true,
            }
        }
    }

    impl PackageRegistry for FakeRegistry {
        fn available_versions(&self, package_name: &str) -> Result<Vec<String>> {
            self.calls.borrow_mut().push(package_name.to_string());
            if self.fail {
                bail!("registry unreachable");
            }
            Ok(self
                .versions
                .get(package_name)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[test]
    fn test_exact_match_resolution() {
        let registry = FakeRegistry::with_versions(&["6.0.0", "6.1.0", "6.1.3"]);
        let mut resolver = VersionResolver::new(&registry);

        let resolved = resolver.resolve_cds_versions("6.1.3", "6.1.3");
        assert_eq!(resolved.resolved_cds_version.as_deref(), Some("6.1.3"));
        assert!(resolved.cds_exact_match);
        assert!(!resolved.is_fallback);
        assert!(resolved.warning.is_none());
    }

    #[test]
    fn test_range_resolution_is_not_fallback() {
        let registry = FakeRegistry::with_versions(&["6.0.0", "6.1.0", "6.1.3"]);
        let mut resolver = VersionResolver::new(&registry);

        let resolved = resolver.resolve_cds_versions("^6.0.0", "^6.0.0");
        assert_eq!(resolved.resolved_cds_version.as_deref(), Some("6.1.3"));
        assert!(!resolved.cds_exact_match);
        assert!(!resolved.is_fallback);
    }

    #[test]
    fn test_unsatisfiable_range_falls_back_with_warning() {
        let registry = FakeRegistry::with_versions(&["6.0.0", "6.1.0", "7.0.0"]);
        let mut resolver = VersionResolver::new(&registry);

        let resolved = resolver.resolve_cds_versions("8.0.0", "8.0.0");
        assert_eq!(resolved.resolved_cds_version.as_deref(), Some("7.0.0"));
        assert_eq!(resolved.resolved_cds_dk_version.as_deref(), Some("7.0.0"));
        assert!(resolved.is_fallback);
        let warning = resolved.warning.expect("fallback must carry a warning");
        assert!(warning.contains("8.0.0"));
        assert!(warning.contains("7.0.0"));
    }

    #[test]
    fn test_registry_failure_reports_absence_not_fallback_warning() {
        let registry = FakeRegistry::failing();
        let mut resolver = VersionResolver::new(&registry);

        let resolved = resolver.resolve_cds_versions("^6.0.0", "^6.0.0");
        assert!(resolved.resolved_cds_version.is_none());
        assert!(resolved.resolved_cds_dk_version.is_none());
        assert!(resolved.warning.is_none());
    }

    #[test]
    fn test_version_list_cached_per_package() {
        let registry = FakeRegistry::with_versions(&["6.1.0"]);
        let mut resolver = VersionResolver::new(&registry);

        resolver.resolve_cds_versions("^6.0.0", "^6.0.0");
        resolver.resolve_cds_versions("~6.1.0", "~6.1.0");
        resolver.resolve_cds_versions("latest", "latest");

        // One query per package across all resolutions.
        assert_eq!(registry.calls.borrow().len(), 2);
    }

    #[test]
    fn test_latest_resolves_to_highest() {
        let registry = FakeRegistry::with_versions(&["5.9.9", "6.1.0", "6.0.2"]);
        let mut resolver = VersionResolver::new(&registry);

        let resolved = resolver.resolve_cds_versions("latest", "latest");
        assert_eq!(resolved.resolved_cds_version.as_deref(), Some("6.1.0"));
        assert!(resolved.cds_exact_match);
        assert!(!resolved.is_fallback);
    }

    #[test]
    fn test_major_mismatch_warns() {
        let compatibility = check_version_compatibility("6.1.0", "7.1.0");
        assert!(!compatibility.is_compatible);
        assert!(compatibility.warning.unwrap().contains("Major version mismatch"));
    }

    #[test]
    fn test_minor_drift_warns_but_compatible() {
        let compatibility = check_version_compatibility("6.1.0", "6.2.0");
        assert!(compatibility.is_compatible);
        assert!(compatibility.warning.unwrap().contains("Minor version difference"));
    }

    #[test]
    fn test_same_minor_is_clean() {
        let compatibility = check_version_compatibility("6.1.0", "6.1.4");
        assert!(compatibility.is_compatible);
        assert!(compatibility.warning.is_none());
    }
}
