//! Scaffolding for the init command
//!
//! Writes a starter sync directory: manifest, version definitions, one
//! example source file and the CI workflow that runs the sync.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::{DEFAULT_SYNC_DIR, MANIFEST_FILE_NAME};

/// Default manifest template
pub const DEFAULT_MANIFEST: &str = r#"# RepoSync Manifest
# Files under `files/` are proposed to every listed target as a pull request.

source_dir = "files"
versions = "versions.toml"
max_in_flight = 4

[change_request]
branch = "reposync/update"
title = "Sync shared files"
commit_message = "chore: sync shared files"
labels = []

# Repositories receiving the files. `host` defaults to github.com and
# `default_branch` to main.
[[targets]]
repo = "your-org/your-repo"

# One rule per canonical file. `destination` defaults to `source`.
[[rules]]
source = "README.md"
destination = "docs/shared/README.md"
targets = ["your-org/your-repo"]

# Per-target adjustments:
# [rules.overrides."your-org/other-repo"]
# destination = "doc/README.md"
# exclude = false
"#;

/// Default version definitions
pub const DEFAULT_VERSIONS: &str = r#"# Values substituted for {{NAME}} placeholders in synced files.
# A value may reference another definition.

[versions]
MSRV = "1.89"
RUST_TOOLCHAIN = "{{MSRV}}.0"
"#;

/// Example shared file
pub const DEFAULT_SHARED_README: &str = r#"# Shared Conventions

This file is managed centrally. Local edits are overwritten by the next sync.

- Minimum supported Rust version: {{MSRV}}
- Toolchain used in CI: {{RUST_TOOLCHAIN}}
"#;

/// CI workflow running the sync whenever the sync directory changes
pub const DEFAULT_WORKFLOW: &str = r#"name: reposync

on:
  push:
    branches: [main]
    paths:
      - ".sync/**"
      - ".github/workflows/reposync.yml"
  workflow_dispatch:

concurrency:
  group: reposync
  cancel-in-progress: false

jobs:
  sync:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: dtolnay/rust-toolchain@stable
      - name: Install reposync
        run: cargo install reposync --locked
      - name: Validate manifest
        run: reposync check
      - name: Apply
        run: reposync apply --json > reposync-report.json
        env:
          GITHUB_TOKEN: ${{ secrets.REPOSYNC_TOKEN }}
      - uses: actions/upload-artifact@v4
        if: always()
        with:
          name: reposync-report
          path: reposync-report.json
"#;

fn write_scaffold_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        println!(
            "  {} Already exists: {} (use --force to overwrite)",
            "!".yellow(),
            path.display()
        );
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  {} Created: {}", "✔".green(), path.display());
    Ok(true)
}

/// Initialize a sync directory in `project_root`. Returns the manifest path.
pub fn init(project_root: &Path, force: bool) -> Result<PathBuf> {
    let sync_dir = project_root.join(DEFAULT_SYNC_DIR);
    let manifest_path = sync_dir.join(MANIFEST_FILE_NAME);

    write_scaffold_file(&manifest_path, DEFAULT_MANIFEST, force)?;
    write_scaffold_file(&sync_dir.join("versions.toml"), DEFAULT_VERSIONS, force)?;
    write_scaffold_file(
        &sync_dir.join("files").join("README.md"),
        DEFAULT_SHARED_README,
        force,
    )?;
    write_scaffold_file(
        &project_root
            .join(".github")
            .join("workflows")
            .join("reposync.yml"),
        DEFAULT_WORKFLOW,
        force,
    )?;

    Ok(manifest_path)
}
