//! Version definitions
//!
//! A versions document maps placeholder names to values:
//!
//! ```toml
//! [versions]
//! TOOL_VERSION = "1.4.2"
//! INSTALL_SPEC = "tool@{{TOOL_VERSION}}"
//! ```
//!
//! Values may reference other definitions. References are resolved
//! transitively; cycles and references to undefined names are errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::templating;

/// Resolved placeholder values, shared read-only by every target pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionMap {
    values: BTreeMap<String, String>,
}

impl VersionMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VersionsDocument {
    #[serde(default)]
    versions: BTreeMap<String, String>,
}

/// Read raw definitions from a TOML or YAML document
pub fn parse_definitions(content: &str, path: &Path) -> Result<BTreeMap<String, String>> {
    let parse_error = |message: String| SyncError::ManifestParse {
        path: path.to_path_buf(),
        message,
    };

    let yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == "yml" || e == "yaml");

    let document: VersionsDocument = if yaml {
        serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?
    } else {
        toml::from_str(content).map_err(|e| parse_error(e.to_string()))?
    };

    if let Some(bad) = document
        .versions
        .keys()
        .find(|name| !templating::is_placeholder_name(name))
    {
        return Err(parse_error(format!("`{bad}` is not a valid placeholder name")));
    }

    Ok(document.versions)
}

/// Load a versions file, apply `overrides` on top of its definitions, and
/// resolve the result
pub fn load(path: &Path, overrides: &[(String, String)]) -> Result<VersionMap> {
    let content = fs::read_to_string(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut definitions = parse_definitions(&content, path)?;
    apply_overrides(&mut definitions, overrides);
    resolve(&definitions)
}

pub fn apply_overrides(definitions: &mut BTreeMap<String, String>, overrides: &[(String, String)]) {
    for (name, value) in overrides {
        definitions.insert(name.clone(), value.clone());
    }
}

/// Resolve every definition to a concrete value
pub fn resolve(definitions: &BTreeMap<String, String>) -> Result<VersionMap> {
    let mut resolved = BTreeMap::new();
    for name in definitions.keys() {
        let mut stack = Vec::new();
        resolve_one(name, definitions, &mut resolved, &mut stack)?;
    }
    Ok(VersionMap { values: resolved })
}

fn resolve_one(
    name: &str,
    definitions: &BTreeMap<String, String>,
    resolved: &mut BTreeMap<String, String>,
    stack: &mut Vec<String>,
) -> Result<()> {
    if resolved.contains_key(name) {
        return Ok(());
    }
    let Some(raw) = definitions.get(name) else {
        return Ok(());
    };

    stack.push(name.to_string());
    for reference in templating::placeholders(raw.as_bytes()) {
        if stack.contains(&reference) || !definitions.contains_key(&reference) {
            return Err(SyncError::UnresolvedVersion {
                name: name.to_string(),
                reference,
            });
        }
        resolve_one(&reference, definitions, resolved, stack)?;
    }
    stack.pop();

    let value = templating::substitute_with(raw.as_bytes(), |key| resolved.get(key).cloned())
        .map_err(|missing| SyncError::UnresolvedVersion {
            name: name.to_string(),
            reference: missing.join(", "),
        })?;
    resolved.insert(name.to_string(), String::from_utf8_lossy(&value).into_owned());
    Ok(())
}
