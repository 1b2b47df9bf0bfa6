//! RepoSync CLI
//!
//! Command-line interface for proposing shared files to many repositories.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use is_terminal::IsTerminal;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::check::{CheckArgs, run_check};
use commands::sync::{RunArgs, run_sync};
use reposync::init;

#[derive(Parser)]
#[command(name = "reposync")]
#[command(
    author,
    version,
    about = "Propose shared files to many repositories as pull requests"
)]
#[command(propagate_version = true)]
struct Cli {
    /// Show detailed output and debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a sync directory and CI workflow
    Init {
        /// Project root directory (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the manifest and render every file locally
    Check(CheckArgs),

    /// Show what a sync would change, without writing anything
    Plan(RunArgs),

    /// Sync files and open or update pull requests
    Apply(RunArgs),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reposync={default}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let cwd = env::current_dir().context("Failed to read current directory")?;

    let code = match cli.command {
        Commands::Init { path, force } => {
            let project_root = path.unwrap_or_else(|| cwd.clone());

            print_header();
            println!("{}", "Initializing reposync...\n".cyan());

            let manifest_path = init::init(&project_root, force)?;

            println!("\n{}", "✨ Initialization complete!".green().bold());
            println!(
                "\nNext steps:\n  1. List your targets and rules in {}\n  2. Run {} to validate\n  3. Commit and push; the workflow runs {}",
                manifest_path.display().to_string().cyan(),
                "reposync check".cyan(),
                "reposync apply".cyan()
            );
            0
        }

        Commands::Check(args) => {
            print_header();
            run_check(args, &cwd)?;
            0
        }

        Commands::Plan(args) => {
            if !args.json {
                print_header();
            }
            run_sync(args, &cwd, true, cli.verbose).await?
        }

        Commands::Apply(args) => {
            if !args.json {
                print_header();
            }
            run_sync(args, &cwd, false, cli.verbose).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_header() {
    println!(
        "{}",
        r#"
╔═══════════════════════════════════════════════════════════════════╗
║                          RepoSync                                 ║
║            Shared File Synchronization Across Repos               ║
╚═══════════════════════════════════════════════════════════════════╝
"#
        .cyan()
        .bold()
    );
}
