//! Placeholder substitution
//!
//! Placeholders are written `{{NAME}}` (inner whitespace allowed). GitHub
//! Actions expressions (`${{ ... }}`) and anything whose inner text is not a
//! valid placeholder name are left untouched. Content is handled as bytes so
//! binary files pass through unchanged.

use regex::bytes::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::error::{Result, SyncError};
use crate::versions::VersionMap;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\$?)\{\{\s*([^{}]+?)\s*\}\}").unwrap());

static NAME_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").unwrap());

/// Whether `name` can be used as a placeholder
pub fn is_placeholder_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

fn placeholder_name<'a>(caps: &'a Captures<'_>) -> Option<&'a str> {
    if !caps[1].is_empty() {
        return None;
    }
    let name = std::str::from_utf8(caps.get(2)?.as_bytes()).ok()?;
    is_placeholder_name(name).then_some(name)
}

/// Names of all placeholders referenced by `content`
pub fn placeholders(content: &[u8]) -> BTreeSet<String> {
    PLACEHOLDER_RE
        .captures_iter(content)
        .filter_map(|caps| placeholder_name(&caps).map(str::to_string))
        .collect()
}

/// Replace every placeholder using `lookup`. On failure returns the sorted
/// names `lookup` had no value for.
pub fn substitute_with<F>(content: &[u8], mut lookup: F) -> std::result::Result<Vec<u8>, Vec<String>>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut missing = BTreeSet::new();

    let replaced = PLACEHOLDER_RE.replace_all(content, |caps: &Captures<'_>| {
        let whole = caps[0].to_vec();
        let Some(name) = placeholder_name(caps) else {
            return whole;
        };
        match lookup(name) {
            Some(value) => value.into_bytes(),
            None => {
                missing.insert(name.to_string());
                whole
            }
        }
    });

    if missing.is_empty() {
        Ok(replaced.into_owned())
    } else {
        Err(missing.into_iter().collect())
    }
}

/// Render a source file against the version map. Missing placeholders are an
/// error, never left in place.
pub fn render(source: &str, content: &[u8], versions: &VersionMap) -> Result<Vec<u8>> {
    substitute_with(content, |name| versions.get(name).map(str::to_string)).map_err(|missing| {
        SyncError::Render {
            source_path: source.to_string(),
            missing,
        }
    })
}
