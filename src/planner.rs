//! Diff planning
//!
//! Renders every rule that applies to a target and compares the result with
//! what the target's default branch currently holds. Planning only reads;
//! running it twice against unchanged inputs yields the same plan.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;

use crate::engine::RunContext;
use crate::error::{Result, SyncError};
use crate::manifest::{RuleBinding, TargetRepository};
use crate::platform::retry::with_retry;
use crate::platform::{Platform, PlatformError};
use crate::templating;
use crate::versions::VersionMap;

/// What has to happen to one destination file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// The destination does not exist yet
    Create,
    /// The destination exists with different content
    Update,
    /// The destination already holds the rendered bytes
    Skip,
}

/// One rendered file and its planned action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub source: String,
    pub destination: String,
    pub action: SyncAction,
    /// Rendered content
    pub content: Vec<u8>,
    /// SHA-256 of `content`
    pub rendered_digest: String,
    /// SHA-256 of the destination at planning time
    pub observed_digest: Option<String>,
}

/// Everything a target needs, computed fresh for every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub target: TargetRepository,
    /// Tip of the default branch the plan was computed against
    pub base_commit: String,
    pub files: Vec<PlannedFile>,
}

impl SyncPlan {
    /// Files that need to be written
    pub fn changes(&self) -> impl Iterator<Item = &PlannedFile> {
        self.files.iter().filter(|f| f.action != SyncAction::Skip)
    }

    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn count(&self, action: SyncAction) -> usize {
        self.files.iter().filter(|f| f.action == action).count()
    }
}

/// Hex SHA-256 of `content`
pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Compare rendered bytes with the destination. Only content matters.
pub fn classify(rendered: &[u8], current: Option<&[u8]>) -> SyncAction {
    match current {
        None => SyncAction::Create,
        Some(current) if current == rendered => SyncAction::Skip,
        Some(_) => SyncAction::Update,
    }
}

/// Render the raw content of a source file for one binding
pub fn render_content(binding: &RuleBinding, raw: Vec<u8>, versions: &VersionMap) -> Result<Vec<u8>> {
    if binding.template {
        templating::render(&binding.source, &raw, versions)
    } else {
        Ok(raw)
    }
}

/// Read and render a binding from disk
pub fn render_binding(binding: &RuleBinding, versions: &VersionMap) -> Result<Vec<u8>> {
    let raw = fs::read(&binding.source_path).map_err(|source| SyncError::Io {
        path: binding.source_path.clone(),
        source,
    })?;
    render_content(binding, raw, versions)
}

/// Compute the plan for one target
pub async fn plan_target(
    ctx: &RunContext,
    platform: &dyn Platform,
    target: &TargetRepository,
) -> Result<SyncPlan> {
    let bindings = ctx.manifest.rules_for(target);

    // Render everything first: a missing placeholder fails the target
    // before any platform call is made.
    let mut rendered = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let raw = tokio::fs::read(&binding.source_path)
            .await
            .map_err(|source| SyncError::Io {
                path: binding.source_path.clone(),
                source,
            })?;
        rendered.push(render_content(binding, raw, &ctx.versions)?);
    }

    let base_commit = with_retry(&ctx.retry, "head_commit", || {
        platform.head_commit(target, &target.default_branch)
    })
    .await
    .map_err(|e| SyncError::platform(target.id(), e))?
    .ok_or_else(|| {
        SyncError::platform(
            target.id(),
            PlatformError::NotFound(format!("default branch {}", target.default_branch)),
        )
    })?;

    let mut files = Vec::with_capacity(bindings.len());
    for (binding, content) in bindings.into_iter().zip(rendered) {
        let current = with_retry(&ctx.retry, "read_file", || {
            platform.read_file(target, &base_commit, &binding.destination)
        })
        .await
        .map_err(|e| SyncError::platform(target.id(), e))?;

        let action = classify(&content, current.as_deref());
        tracing::debug!(
            repo = %target,
            destination = %binding.destination,
            ?action,
            "Planned file"
        );

        files.push(PlannedFile {
            source: binding.source,
            destination: binding.destination,
            action,
            rendered_digest: digest(&content),
            observed_digest: current.as_deref().map(digest),
            content,
        });
    }

    Ok(SyncPlan {
        target: target.clone(),
        base_commit,
        files,
    })
}
