//! Publishing plans
//!
//! Applies a [`SyncPlan`] to its target: stages every changed file in a
//! working copy, writes them as one commit on the sync branch and opens or
//! updates the change request for that branch.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::engine::RunContext;
use crate::error::{Result, SyncError};
use crate::manifest::TargetRepository;
use crate::planner::{SyncAction, SyncPlan, digest};
use crate::platform::retry::with_retry;
use crate::platform::{ChangeRequest, ChangeRequestDraft, CommitRequest, Platform, PlatformError};

/// Staging area for one target. Owned by exactly one pipeline.
#[derive(Debug)]
pub struct WorkingCopy {
    target: TargetRepository,
    staged: BTreeMap<String, Vec<u8>>,
}

impl WorkingCopy {
    pub fn new(target: TargetRepository) -> Self {
        Self {
            target,
            staged: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> &TargetRepository {
        &self.target
    }

    pub fn stage(&mut self, path: impl Into<String>, content: Vec<u8>) {
        self.staged.insert(path.into(), content);
    }

    pub fn staged(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Group every staged file into a single commit on `branch`
    pub fn into_commit(self, branch: &str, parent: &str, message: &str) -> CommitRequest {
        CommitRequest {
            branch: branch.to_string(),
            parent: parent.to_string(),
            message: message.to_string(),
            files: self.staged,
        }
    }
}

/// Result of publishing one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Commit written on the sync branch; `None` when the branch was already current
    pub commit: Option<String>,
    pub change_request: Option<ChangeRequest>,
}

fn publish_error(target: &TargetRepository, e: PlatformError) -> SyncError {
    match e {
        PlatformError::Conflict(reason) => SyncError::PublishConflict {
            target: target.id(),
            reason,
        },
        other => SyncError::platform(target.id(), other),
    }
}

/// Body listing every changed file, used when the manifest does not set one
fn default_body(plan: &SyncPlan) -> String {
    let mut body = String::from("Shared files updated by reposync.\n\n| File | Change |\n|---|---|\n");
    for file in plan.changes() {
        let change = match file.action {
            SyncAction::Create => "created",
            SyncAction::Update => "updated",
            SyncAction::Skip => continue,
        };
        let _ = writeln!(body, "| `{}` | {} |", file.destination, change);
    }
    body
}

/// Whether the sync commit at `sync_head`, sitting directly on `head`,
/// changes exactly the staged paths to exactly the staged bytes
async fn sync_commit_matches(
    ctx: &RunContext,
    platform: &dyn Platform,
    working_copy: &WorkingCopy,
    head: &str,
    sync_head: &str,
) -> Result<bool> {
    let target = working_copy.target();
    let retry = &ctx.retry;

    let behind = with_retry(retry, "commits_ahead", || {
        platform.commits_ahead(target, sync_head, head)
    })
    .await
    .map_err(|e| publish_error(target, e))?;
    if behind > 0 {
        return Ok(false);
    }

    let changed = with_retry(retry, "changed_paths", || {
        platform.changed_paths(target, head, sync_head)
    })
    .await
    .map_err(|e| publish_error(target, e))?;
    if !changed.iter().eq(working_copy.staged().keys()) {
        return Ok(false);
    }

    for (path, content) in working_copy.staged() {
        let existing = with_retry(retry, "read_file", || {
            platform.read_file(target, sync_head, path)
        })
        .await
        .map_err(|e| publish_error(target, e))?;
        if existing.as_deref() != Some(content.as_slice()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Publish `plan`. Consumes the plan; a conflicting target is reported, not retried.
pub async fn publish(
    ctx: &RunContext,
    platform: &dyn Platform,
    plan: SyncPlan,
) -> Result<PublishOutcome> {
    let target = plan.target.clone();
    if plan.is_noop() {
        return Ok(PublishOutcome {
            commit: None,
            change_request: None,
        });
    }

    let settings = &ctx.manifest.change_request;
    let retry = &ctx.retry;
    let branch = settings.branch.as_str();
    let base = target.default_branch.as_str();

    let head = with_retry(retry, "head_commit", || platform.head_commit(&target, base))
        .await
        .map_err(|e| publish_error(&target, e))?
        .ok_or_else(|| {
            SyncError::platform(
                target.id(),
                PlatformError::NotFound(format!("default branch {base}")),
            )
        })?;

    if head != plan.base_commit {
        let mut moved = Vec::new();
        for file in plan.changes() {
            let current = with_retry(retry, "read_file", || {
                platform.read_file(&target, &head, &file.destination)
            })
            .await
            .map_err(|e| publish_error(&target, e))?;
            if current.as_deref().map(digest) != file.observed_digest {
                moved.push(file.destination.clone());
            }
        }
        if !moved.is_empty() {
            return Err(SyncError::PublishConflict {
                target: target.id(),
                reason: format!(
                    "{base} changed since planning: {}",
                    moved.join(", ")
                ),
            });
        }
        tracing::debug!(repo = %target, %head, "Default branch moved without touching synced files");
    }

    let mut working_copy = WorkingCopy::new(target.clone());
    for file in plan.changes() {
        working_copy.stage(file.destination.clone(), file.content.clone());
    }

    let sync_head = with_retry(retry, "head_commit", || platform.head_commit(&target, branch))
        .await
        .map_err(|e| publish_error(&target, e))?;

    let mut current = false;
    if let Some(sync_head) = &sync_head {
        let ahead = with_retry(retry, "commits_ahead", || {
            platform.commits_ahead(&target, &head, sync_head)
        })
        .await
        .map_err(|e| publish_error(&target, e))?;

        if ahead > 1 {
            return Err(SyncError::PublishConflict {
                target: target.id(),
                reason: format!("{branch} carries {ahead} commits not written by the sync"),
            });
        }

        if ahead == 1 {
            // Only a commit carrying the sync's own message may be replaced
            let message = with_retry(retry, "commit_message", || {
                platform.commit_message(&target, sync_head)
            })
            .await
            .map_err(|e| publish_error(&target, e))?;
            if message.trim_end() != settings.commit_message.trim_end() {
                return Err(SyncError::PublishConflict {
                    target: target.id(),
                    reason: format!("{branch} carries a commit not written by the sync"),
                });
            }

            current = sync_commit_matches(ctx, platform, &working_copy, &head, sync_head).await?;
        }
    }

    let commit = if current {
        tracing::info!(repo = %target, %branch, "Sync branch already up to date");
        None
    } else {
        tracing::debug!(repo = %working_copy.target(), files = working_copy.staged().len(), "Writing sync commit");
        let request = working_copy.into_commit(branch, &head, &settings.commit_message);
        let id = with_retry(retry, "write_commit", || platform.write_commit(&target, &request))
            .await
            .map_err(|e| publish_error(&target, e))?;
        tracing::info!(repo = %target, commit = %id, files = request.files.len(), "Committed synced files");
        Some(id)
    };

    let draft = ChangeRequestDraft {
        head: branch.to_string(),
        base: base.to_string(),
        title: settings.title.clone(),
        body: settings.body.clone().unwrap_or_else(|| default_body(&plan)),
        labels: settings.labels.clone(),
    };

    let existing = with_retry(retry, "find_change_request", || {
        platform.find_change_request(&target, branch, base)
    })
    .await
    .map_err(|e| publish_error(&target, e))?;

    let change_request = match existing {
        Some(open) => {
            with_retry(retry, "update_change_request", || {
                platform.update_change_request(&target, open.number, &draft)
            })
            .await
            .map_err(|e| publish_error(&target, e))?
        }
        None => {
            with_retry(retry, "open_change_request", || {
                platform.open_change_request(&target, &draft)
            })
            .await
            .map_err(|e| publish_error(&target, e))?
        }
    };
    tracing::info!(repo = %target, number = change_request.number, url = %change_request.url, "Change request ready");

    Ok(PublishOutcome {
        commit,
        change_request: Some(change_request),
    })
}
