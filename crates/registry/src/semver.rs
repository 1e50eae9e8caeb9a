//! Semantic version parsing, ordering, and range satisfaction.
//!
//! Covers exactly the operators npm ranges use in the descriptors this tool
//! reads: `^`, `~`, `>=`, `>`, `<=`, `<`, bare exact versions, and the
//! literal `latest`.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn semver_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z.-]+))?(?:\+([0-9A-Za-z.-]+))?$").unwrap()
    })
}

/// A parsed version. Ordering follows semver precedence: numeric fields
/// first, then prerelease sorts before the corresponding release; build
/// metadata never participates.
#[derive(Debug, Clone)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
    /// The string the version was parsed from, returned to callers verbatim.
    pub original: String,
}

impl SemanticVersion {
    /// Synthetic maximum used for the literal `latest` so it always sorts
    /// newest.
    fn latest_sentinel() -> Self {
        Self {
            major: u64::MAX,
            minor: u64::MAX,
            patch: u64::MAX,
            prerelease: None,
            build: None,
            original: "latest".to_string(),
        }
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
                (None, None) => Ordering::Equal,
            })
    }
}

/// Parse a version or range string (`6.1.3`, `^6.0.0`, `~6.1.0`, `latest`).
/// Range operators are stripped; `None` for anything else unparseable.
pub fn parse_semantic_version(version: &str) -> Option<SemanticVersion> {
    if version == "latest" {
        return Some(SemanticVersion::latest_sentinel());
    }

    let clean = version.trim_start_matches(['^', '~', '>', '<', '=']);
    let caps = semver_regex().captures(clean)?;

    Some(SemanticVersion {
        major: caps[1].parse().ok()?,
        minor: caps[2].parse().ok()?,
        patch: caps[3].parse().ok()?,
        prerelease: caps.get(4).map(|m| m.as_str().to_string()),
        build: caps.get(5).map(|m| m.as_str().to_string()),
        original: version.to_string(),
    })
}

/// Semver-precedence comparison; a convenience alias over [`Ord`].
pub fn compare_versions(a: &SemanticVersion, b: &SemanticVersion) -> Ordering {
    a.cmp(b)
}

/// Whether `version` satisfies a declared range.
pub fn satisfies_range(version: &SemanticVersion, range: &str) -> bool {
    if range == "latest" {
        return true;
    }

    let range_version = match parse_semantic_version(range) {
        Some(parsed) => parsed,
        None => return false,
    };

    if range.starts_with('^') {
        version.major == range_version.major && *version >= range_version
    } else if range.starts_with('~') {
        version.major == range_version.major
            && version.minor == range_version.minor
            && *version >= range_version
    } else if range.starts_with(">=") {
        *version >= range_version
    } else if range.starts_with('>') {
        *version > range_version
    } else if range.starts_with("<=") {
        *version <= range_version
    } else if range.starts_with('<') {
        *version < range_version
    } else {
        *version == range_version
    }
}

/// Pick the best version from an available list for a required range: the
/// highest satisfying version, falling back to the highest available
/// overall. `None` only when nothing parses at all.
pub fn find_best_available_version(available: &[String], required: &str) -> Option<String> {
    let mut parsed: Vec<SemanticVersion> = available
        .iter()
        .filter_map(|v| parse_semantic_version(v))
        .collect();

    if parsed.is_empty() {
        return None;
    }

    parsed.sort_by(|a, b| b.cmp(a));

    parsed
        .iter()
        .find(|v| satisfies_range(v, required))
        .or_else(|| parsed.first())
        .map(|v| v.original.clone())
}
