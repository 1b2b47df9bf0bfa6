//! CLI subcommands

pub mod check;
pub mod sync;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reposync::versions::{self, VersionMap};
use reposync::Manifest;

/// Arguments shared by every command that reads a manifest
#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Path to the manifest (default: search upward for .sync/reposync.toml)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Path to the version definitions (default: `versions` in the manifest)
    #[arg(long)]
    pub versions: Option<PathBuf>,

    /// Override a version definition
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if !reposync::templating::is_placeholder_name(name) {
        return Err(format!("`{name}` is not a valid placeholder name"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Locate and load the manifest and its version map
pub fn load_inputs(args: &ManifestArgs, cwd: &Path) -> Result<(Manifest, VersionMap)> {
    let manifest_path = match &args.manifest {
        Some(p) => p.clone(),
        None => Manifest::find_manifest(cwd).ok_or_else(|| {
            anyhow!(
                "No reposync manifest found from {} upward. Run `reposync init` first.",
                cwd.display()
            )
        })?,
    };

    let manifest = Manifest::load(&manifest_path)
        .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;

    let versions = match &args.versions {
        Some(path) => versions::load(path, &args.overrides)
            .with_context(|| format!("Failed to load versions {}", path.display()))?,
        None => {
            let path = manifest.versions_path();
            if path.exists() {
                versions::load(&path, &args.overrides)
                    .with_context(|| format!("Failed to load versions {}", path.display()))?
            } else {
                tracing::debug!(path = %path.display(), "No versions file, using overrides only");
                let mut definitions = BTreeMap::new();
                versions::apply_overrides(&mut definitions, &args.overrides);
                versions::resolve(&definitions)?
            }
        }
    };

    Ok((manifest, versions))
}
