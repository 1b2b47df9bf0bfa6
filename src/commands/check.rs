use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

use reposync::Manifest;
use reposync::manifest::normalize_repo_path;
use reposync::planner::render_binding;

use super::{ManifestArgs, load_inputs};

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub inputs: ManifestArgs,
}

/// Source files no rule refers to, relative to the source directory
pub fn unreferenced_sources(manifest: &Manifest) -> Vec<String> {
    let referenced: BTreeSet<String> = manifest
        .rules
        .iter()
        .map(|rule| normalize_repo_path(&rule.source))
        .collect();
    let source_dir = manifest.source_dir();

    let mut orphans: Vec<String> = WalkDir::new(&source_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(&source_dir).ok()?;
            let relative = normalize_repo_path(&relative.to_string_lossy().replace('\\', "/"));
            (!referenced.contains(&relative)).then_some(relative)
        })
        .collect();
    orphans.sort();
    orphans
}

/// Validate the manifest and render every rule for every target, offline
pub fn run_check(args: CheckArgs, cwd: &Path) -> Result<()> {
    let (manifest, versions) = load_inputs(&args.inputs, cwd)?;

    println!(
        "Manifest: {}",
        manifest.path.display().to_string().dimmed()
    );
    if versions.is_empty() {
        println!("Versions: {}\n", "none defined".yellow());
    } else {
        println!(
            "Versions: {} definition(s)\n",
            versions.len().to_string().cyan()
        );
    }

    let mut rendered = 0usize;
    let mut errors = 0usize;

    for target in manifest.target_repositories() {
        println!("{}", target.id().bold());
        for binding in manifest.rules_for(&target) {
            match render_binding(&binding, &versions) {
                Ok(_) => {
                    rendered += 1;
                    println!(
                        "  {} {} -> {}",
                        "✔".green(),
                        binding.source,
                        binding.destination.cyan()
                    );
                }
                Err(e) => {
                    errors += 1;
                    tracing::error!(repo = %target, source = %binding.source, error = %e, "Render failed");
                    println!("  {} {}: {}", "✘".red(), binding.source, e.to_string().red());
                }
            }
        }
    }

    let orphans = unreferenced_sources(&manifest);
    if !orphans.is_empty() {
        println!("\n{}", "Unreferenced source files:".yellow().bold());
        for orphan in &orphans {
            println!("  {} {}", "!".yellow(), orphan);
        }
    }

    if errors > 0 {
        bail!("{errors} file(s) failed to render");
    }

    println!("\n{}", "✨ Manifest OK!".green().bold());
    println!(
        "  Rendered: {}, Unreferenced: {}",
        rendered.to_string().green(),
        orphans.len().to_string().dimmed()
    );
    Ok(())
}
