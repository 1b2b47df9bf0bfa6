//! Run reports
//!
//! One [`TargetOutcome`] per target, suitable for a terminal summary or a
//! JSON artifact in CI.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::error::SyncError;
use crate::manifest::TargetRepository;
use crate::planner::{SyncAction, SyncPlan};
use crate::platform::ChangeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// Every changed file is new in the target
    Created,
    /// At least one existing file changed
    Updated,
    /// Nothing to do
    Skipped,
    Failed,
}

impl TargetStatus {
    pub fn from_plan(plan: &SyncPlan) -> Self {
        if plan.is_noop() {
            TargetStatus::Skipped
        } else if plan.changes().all(|f| f.action == SyncAction::Create) {
            TargetStatus::Created
        } else {
            TargetStatus::Updated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub source: String,
    pub destination: String,
    pub action: SyncAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

impl From<&SyncError> for ErrorDetail {
    fn from(e: &SyncError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub target: String,
    pub status: TargetStatus,
    pub files: Vec<FileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_request: Option<ChangeRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl TargetOutcome {
    pub fn planned(plan: &SyncPlan) -> Self {
        Self {
            target: plan.target.id(),
            status: TargetStatus::from_plan(plan),
            files: plan
                .files
                .iter()
                .map(|f| FileOutcome {
                    source: f.source.clone(),
                    destination: f.destination.clone(),
                    action: f.action,
                })
                .collect(),
            commit: None,
            change_request: None,
            error: None,
        }
    }

    pub fn failed(target: &TargetRepository, error: &SyncError) -> Self {
        Self {
            target: target.id(),
            status: TargetStatus::Failed,
            files: Vec::new(),
            commit: None,
            change_request: None,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == TargetStatus::Failed
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Some targets failed, at least one succeeded
    PartialFailure,
    /// Every target failed
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub targets: Vec<TargetOutcome>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        dry_run: bool,
        targets: Vec<TargetOutcome>,
    ) -> Self {
        let failed = targets.iter().filter(|t| t.is_failure()).count();
        let status = if failed == 0 {
            RunStatus::Success
        } else if failed < targets.len() {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failure
        };

        Self {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            status,
            targets,
        }
    }

    pub fn count(&self, status: TargetStatus) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.targets.iter().filter(|t| t.is_failure())
    }

    pub fn outcome(&self, target: &str) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.target == target)
    }

    /// Nonzero only when every target failed
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Failure => 1,
            RunStatus::Success | RunStatus::PartialFailure => 0,
        }
    }

    /// Human-readable summary
    pub fn print_summary(&self, verbose: bool) {
        for outcome in &self.targets {
            let (icon, label) = match outcome.status {
                TargetStatus::Created => ("✔".green(), "created".green()),
                TargetStatus::Updated => ("✔".green(), "updated".yellow()),
                TargetStatus::Skipped => ("○".dimmed(), "up to date".dimmed()),
                TargetStatus::Failed => ("✘".red(), "failed".red()),
            };
            println!("  {} {} {}", icon, outcome.target.bold(), label);

            if let Some(cr) = &outcome.change_request {
                println!("      {} #{} {}", "→".cyan(), cr.number, cr.url.dimmed());
            }
            if let Some(error) = &outcome.error {
                println!("      {}", error.message.red());
            }
            for file in &outcome.files {
                if file.action == SyncAction::Skip && !verbose {
                    continue;
                }
                let action = match file.action {
                    SyncAction::Create => "create".green(),
                    SyncAction::Update => "update".yellow(),
                    SyncAction::Skip => "skip".dimmed(),
                };
                println!("      {:<7} {}", action, file.destination);
            }
        }

        let errors = self.count(TargetStatus::Failed);
        let heading = match self.status {
            RunStatus::Success if self.dry_run => "✨ Plan complete!".green().bold(),
            RunStatus::Success => "✨ Sync complete!".green().bold(),
            RunStatus::PartialFailure => "⚠ Sync finished with failures".yellow().bold(),
            RunStatus::Failure => "✘ Sync failed for every target".red().bold(),
        };
        println!("\n{}", heading);
        println!(
            "  Created: {}, Updated: {}, Skipped: {}, Errors: {}",
            self.count(TargetStatus::Created).to_string().green(),
            self.count(TargetStatus::Updated).to_string().yellow(),
            self.count(TargetStatus::Skipped).to_string().dimmed(),
            if errors > 0 {
                errors.to_string().red()
            } else {
                errors.to_string().dimmed()
            }
        );
    }
}
