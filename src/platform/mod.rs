//! Hosting platform seam
//!
//! The engine never talks HTTP directly. Everything it needs from the
//! platform that hosts target repositories goes through [`Platform`].

pub mod github;
pub mod memory;
pub mod retry;

pub use github::GitHubPlatform;
pub use memory::MemoryPlatform;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::manifest::TargetRepository;

/// Errors reported by platform adapters
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// Network failures, server errors and rate limiting. Retried.
    #[error("transient platform failure: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The platform refused a write because a ref moved.
    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

/// A commit to write onto a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Branch receiving the commit. Created when missing, otherwise reset.
    pub branch: String,
    /// Parent commit
    pub parent: String,
    pub message: String,
    /// Repository path to full file content
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Title, body and labels of a change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequestDraft {
    /// Branch holding the proposed commits
    pub head: String,
    /// Branch the change request targets
    pub base: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// An open change request on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRequest {
    pub number: u64,
    pub url: String,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Commit id at the tip of `branch`, or `None` when the branch does not exist
    async fn head_commit(
        &self,
        repo: &TargetRepository,
        branch: &str,
    ) -> Result<Option<String>, PlatformError>;

    /// File content at `commit`, or `None` when the path does not exist there
    async fn read_file(
        &self,
        repo: &TargetRepository,
        commit: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PlatformError>;

    /// Number of commits reachable from `head` but not from `base`
    async fn commits_ahead(
        &self,
        repo: &TargetRepository,
        base: &str,
        head: &str,
    ) -> Result<u32, PlatformError>;

    /// Paths whose content differs between `base` and `head`, sorted
    async fn changed_paths(
        &self,
        repo: &TargetRepository,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, PlatformError>;

    /// Full message of `commit`
    async fn commit_message(
        &self,
        repo: &TargetRepository,
        commit: &str,
    ) -> Result<String, PlatformError>;

    /// Write one commit containing every file in `request`, returning its id
    async fn write_commit(
        &self,
        repo: &TargetRepository,
        request: &CommitRequest,
    ) -> Result<String, PlatformError>;

    /// The open change request whose head is `head`, if any
    async fn find_change_request(
        &self,
        repo: &TargetRepository,
        head: &str,
        base: &str,
    ) -> Result<Option<ChangeRequest>, PlatformError>;

    async fn open_change_request(
        &self,
        repo: &TargetRepository,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PlatformError>;

    async fn update_change_request(
        &self,
        repo: &TargetRepository,
        number: u64,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PlatformError>;
}
