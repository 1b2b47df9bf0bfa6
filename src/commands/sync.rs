use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use reposync::engine::{self, CancelHandle, RunContext, RunOptions, cancellation};
use reposync::{GitHubPlatform, Platform, TargetRepository};

use super::{ManifestArgs, load_inputs};

/// Arguments for the plan and apply commands
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub inputs: ManifestArgs,

    /// Restrict the run to these targets (comma-separated, owner/name or host/owner/name)
    #[arg(long, value_delimiter = ',')]
    pub only: Option<Vec<String>>,

    /// Maximum number of targets processed at the same time
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Platform API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Platform API base URL (default: derived from each target's host)
    #[arg(long, env = "REPOSYNC_API_URL")]
    pub api_url: Option<Url>,
}

/// Keep the targets matching `only`; every reference has to match something
pub fn select_targets(
    targets: Vec<TargetRepository>,
    only: Option<&[String]>,
) -> Result<Vec<TargetRepository>> {
    let Some(only) = only else {
        return Ok(targets);
    };

    for reference in only {
        if !targets.iter().any(|t| t.matches(reference)) {
            bail!("--only `{reference}` does not match any target in the manifest");
        }
    }

    Ok(targets
        .into_iter()
        .filter(|t| only.iter().any(|r| t.matches(r)))
        .collect())
}

/// The first interrupt cancels the run and lets started targets finish; a
/// second one returns `true` so the caller can abort.
pub async fn watch_interrupts<F, Fut>(handle: CancelHandle, mut interrupted: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut cancelled = false;
    while interrupted().await.is_ok() {
        if cancelled {
            tracing::error!("Interrupted again, aborting");
            return true;
        }
        tracing::warn!("Interrupted, waiting for started targets to finish (press Ctrl-C again to abort)");
        handle.cancel();
        cancelled = true;
    }
    false
}

/// Run the sync. Returns the process exit code.
pub async fn run_sync(args: RunArgs, cwd: &Path, dry_run: bool, verbose: bool) -> Result<i32> {
    let (manifest, versions) = load_inputs(&args.inputs, cwd)?;

    let max_in_flight = args.max_in_flight.unwrap_or(manifest.max_in_flight);
    if max_in_flight == 0 {
        bail!("--max-in-flight must be at least 1");
    }

    let targets = select_targets(manifest.target_repositories(), args.only.as_deref())?;

    if args.token.is_none() {
        tracing::warn!("No GITHUB_TOKEN set, requests are unauthenticated");
    }
    let platform: Arc<dyn Platform> = Arc::new(
        GitHubPlatform::new(args.api_url, args.token).context("Failed to build platform client")?,
    );

    if !args.json {
        let action = if dry_run { "Planning" } else { "Syncing" };
        println!(
            "{}",
            format!("➤ {action} {} target(s)", targets.len()).cyan().bold()
        );
    }

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        if watch_interrupts(handle, tokio::signal::ctrl_c).await {
            std::process::exit(130);
        }
    });

    let ctx = Arc::new(RunContext::new(manifest, versions));
    let report = engine::run(
        ctx,
        targets,
        platform,
        RunOptions {
            max_in_flight,
            dry_run,
        },
        signal,
    )
    .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_summary(verbose);
    }

    Ok(report.exit_code())
}
