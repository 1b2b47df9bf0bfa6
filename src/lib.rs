//! RepoSync - Shared File Synchronization Across Repositories
//!
//! Keeps canonical files (CI workflows, lint configs, docs) in one place and
//! proposes them to every target repository as a change request. Source
//! files may carry `{{NAME}}` placeholders that are filled from a central
//! version-definitions file before they are written.

pub mod engine;
pub mod error;
pub mod init;
pub mod manifest;
pub mod planner;
pub mod platform;
pub mod publisher;
pub mod report;
pub mod templating;
pub mod versions;

pub use engine::{CancelHandle, CancelSignal, RunContext, RunOptions, cancellation, run};
pub use error::{Result, SyncError};
pub use manifest::{Manifest, TargetRepository};
pub use planner::{SyncAction, SyncPlan};
pub use platform::{GitHubPlatform, MemoryPlatform, Platform, PlatformError, RetryPolicy};
pub use report::{RunReport, RunStatus, TargetOutcome, TargetStatus};
pub use versions::VersionMap;
