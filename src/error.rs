//! Error types for reposync
//!
//! Every failure a run can hit maps onto one [`SyncError`] variant. Errors
//! raised while processing a target only abort that target; the engine
//! records them in the run report.

use std::path::PathBuf;
use thiserror::Error;

use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The manifest or versions document is not well-formed.
    #[error("failed to parse {}: {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },

    /// The manifest parsed but describes an impossible sync.
    #[error("invalid manifest {}: {}", path.display(), problems.join("; "))]
    ManifestValidation {
        path: PathBuf,
        problems: Vec<String>,
    },

    /// A version definition refers to a placeholder that cannot be resolved.
    #[error("version `{name}` references unresolved placeholder `{reference}`")]
    UnresolvedVersion { name: String, reference: String },

    /// A templated source file references placeholders missing from the version map.
    #[error("cannot render {source_path}: missing placeholders {}", missing.join(", "))]
    Render {
        source_path: String,
        missing: Vec<String>,
    },

    /// The target moved under us in a way that prevents a clean write.
    #[error("publish conflict in {target}: {reason}")]
    PublishConflict { target: String, reason: String },

    /// The hosting platform failed (after retries for transient failures).
    #[error("platform error for {target}: {source}")]
    PlatformApi {
        target: String,
        #[source]
        source: PlatformError,
    },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before this target was started.
    #[error("run cancelled before {target} was started")]
    Cancelled { target: String },
}

impl SyncError {
    /// Short machine-friendly name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::ManifestParse { .. } => "manifest_parse",
            SyncError::ManifestValidation { .. } => "manifest_validation",
            SyncError::UnresolvedVersion { .. } => "unresolved_version",
            SyncError::Render { .. } => "render",
            SyncError::PublishConflict { .. } => "publish_conflict",
            SyncError::PlatformApi { .. } => "platform_api",
            SyncError::Io { .. } => "io",
            SyncError::Cancelled { .. } => "cancelled",
        }
    }

    pub(crate) fn platform(target: impl Into<String>, source: PlatformError) -> Self {
        SyncError::PlatformApi {
            target: target.into(),
            source,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
