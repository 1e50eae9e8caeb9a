//! Lexical scanning of CDS source text.
//!
//! This is deliberately not a grammar: a regex pass picks out `using … from`
//! statements and top-level definition names, tolerating arbitrary
//! whitespace. Everything else in the file is ignored. Callers that need
//! real semantics get them from the external compiler's JSON output, not
//! from here.

use anyhow::{bail, Result};
use capstan_core::FileSystem;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::model::CdsImport;

fn using_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // using X from 'path';  /  using { X, Y } from "path";  /
        // using X as Y from `path`;
        Regex::new(r#"using\s+(?:\{[^}]+\}|[\w.]+(?:\s+as\s+[\w.]+)?)\s+from\s+['"`]([^'"`]+)['"`]\s*;"#)
            .unwrap()
    })
}

fn namespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bnamespace\s+([A-Za-z_][\w.]*)\s*;").unwrap())
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bentity\s+([A-Za-z_][\w.]*)").unwrap())
}

fn service_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bservice\s+([A-Za-z_][\w.]*)").unwrap())
}

/// Extract all import statements from a CDS file.
///
/// Fails when the file does not exist; read errors propagate with context.
pub fn extract_cds_imports(fs: &dyn FileSystem, file_path: &Path) -> Result<Vec<CdsImport>> {
    if !fs.is_file(file_path) {
        bail!("File does not exist: {}", file_path.display());
    }

    let content = fs.read_to_string(file_path)?;
    Ok(scan_imports(&content))
}

/// Scan raw CDS text for `using … from '…';` statements.
pub fn scan_imports(content: &str) -> Vec<CdsImport> {
    using_regex()
        .captures_iter(content)
        .map(|caps| {
            let path = caps[1].to_string();
            let is_relative = path.starts_with("./") || path.starts_with("../");
            let is_module = !is_relative && !path.starts_with('/');
            CdsImport {
                statement: caps[0].to_string(),
                path,
                is_relative,
                is_module,
                resolved_path: None,
            }
        })
        .collect()
}

/// Top-level names found by the lexical pass. Best-effort; used only as a
/// structural signal and for debug visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdsDefinitions {
    pub namespace: Option<String>,
    pub entities: Vec<String>,
    pub services: Vec<String>,
}

/// Scan raw CDS text for namespace, entity, and service declarations.
pub fn scan_definitions(content: &str) -> CdsDefinitions {
    CdsDefinitions {
        namespace: namespace_regex()
            .captures(content)
            .map(|caps| caps[1].to_string()),
        entities: entity_regex()
            .captures_iter(content)
            .map(|caps| caps[1].to_string())
            .collect(),
        services: service_regex()
            .captures_iter(content)
            .map(|caps| caps[1].to_string())
            .collect(),
    }
}
