//! Run orchestration
//!
//! Fans out over the target repositories with a bounded number of
//! pipelines in flight. Each pipeline plans and then publishes one target;
//! a failing target never stops its siblings. Everything ends up in the
//! [`RunReport`].

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::manifest::{Manifest, TargetRepository};
use crate::planner::{SyncPlan, plan_target};
use crate::platform::{Platform, RetryPolicy};
use crate::publisher::publish;
use crate::report::{ErrorDetail, RunReport, TargetOutcome, TargetStatus};
use crate::versions::VersionMap;

/// Read-only configuration shared by every target pipeline
#[derive(Debug)]
pub struct RunContext {
    pub manifest: Manifest,
    pub versions: VersionMap,
    pub retry: RetryPolicy,
}

impl RunContext {
    pub fn new(manifest: Manifest, versions: VersionMap) -> Self {
        Self {
            manifest,
            versions,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on concurrently processed targets
    pub max_in_flight: usize,
    /// Plan only; publish nothing
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            dry_run: false,
        }
    }
}

/// Requests cancellation of a run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the run to stop launching targets
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = cancellation();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation was requested
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Plan, and unless this is a dry run publish, one target
#[instrument(skip(ctx, platform), fields(repo = %target))]
pub async fn sync_target(
    ctx: &RunContext,
    platform: &dyn Platform,
    target: &TargetRepository,
    dry_run: bool,
) -> Result<TargetOutcome> {
    let plan: SyncPlan = plan_target(ctx, platform, target).await?;
    let mut outcome = TargetOutcome::planned(&plan);

    if dry_run || plan.is_noop() {
        return Ok(outcome);
    }

    let published = publish(ctx, platform, plan).await?;
    outcome.commit = published.commit;
    outcome.change_request = published.change_request;
    Ok(outcome)
}

/// Run the whole sync over `targets`
pub async fn run(
    ctx: Arc<RunContext>,
    targets: Vec<TargetRepository>,
    platform: Arc<dyn Platform>,
    options: RunOptions,
    mut cancel: CancelSignal,
) -> RunReport {
    let started_at = Utc::now();
    let semaphore = Arc::new(Semaphore::new(options.max_in_flight.max(1)));
    let mut outcomes: Vec<Option<TargetOutcome>> = vec![None; targets.len()];
    let mut join_set = JoinSet::new();

    info!(
        targets = targets.len(),
        max_in_flight = options.max_in_flight,
        dry_run = options.dry_run,
        "Starting sync run"
    );

    for (idx, target) in targets.iter().cloned().enumerate() {
        let permit = if cancel.is_cancelled() {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            }
        };

        let Some(permit) = permit else {
            warn!(repo = %target, "Run cancelled, target not started");
            let cancelled = SyncError::Cancelled {
                target: target.id(),
            };
            outcomes[idx] = Some(TargetOutcome::failed(&target, &cancelled));
            continue;
        };

        let ctx = Arc::clone(&ctx);
        let platform = Arc::clone(&platform);
        let dry_run = options.dry_run;
        join_set.spawn(async move {
            let _permit = permit;
            let outcome = match sync_target(&ctx, platform.as_ref(), &target, dry_run).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(repo = %target, error = %e, "Target failed");
                    TargetOutcome::failed(&target, &e)
                }
            };
            (idx, outcome)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
            Err(e) => error!(error = %e, "Target pipeline aborted"),
        }
    }

    let outcomes = outcomes
        .into_iter()
        .zip(&targets)
        .map(|(outcome, target)| {
            outcome.unwrap_or_else(|| TargetOutcome {
                target: target.id(),
                status: TargetStatus::Failed,
                files: Vec::new(),
                commit: None,
                change_request: None,
                error: Some(ErrorDetail {
                    kind: "internal".to_string(),
                    message: "target pipeline aborted before reporting".to_string(),
                }),
            })
        })
        .collect();

    let report = RunReport::new(started_at, options.dry_run, outcomes);
    info!(status = ?report.status, "Sync run finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_FILE_NAME;
    use crate::platform::memory::Operation;
    use crate::platform::{
        ChangeRequest, ChangeRequestDraft, CommitRequest, MemoryPlatform, PlatformError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use crate::planner::SyncAction;
    use crate::report::RunStatus;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
        [change_request]
        labels = ["automation"]

        [[targets]]
        repo = "octo/repo-x"

        [[targets]]
        repo = "octo/repo-y"

        [[rules]]
        source = "fileA.txt"
        targets = ["octo/repo-x", "octo/repo-y"]
    "#;

    fn context(dir: &TempDir, versions: &[(&str, &str)]) -> Arc<RunContext> {
        context_with(dir, MANIFEST, versions)
    }

    fn context_with(dir: &TempDir, manifest: &str, versions: &[(&str, &str)]) -> Arc<RunContext> {
        let files = dir.path().join("files");
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("fileA.txt"), "version {{TOOL_VERSION}}\n").unwrap();
        fs::write(files.join("fileB.txt"), "shared notes\n").unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        fs::write(&path, manifest).unwrap();

        let manifest = Manifest::load(&path).unwrap();
        let definitions: BTreeMap<String, String> = versions
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let versions = crate::versions::resolve(&definitions).unwrap();
        Arc::new(RunContext::new(manifest, versions).with_retry(RetryPolicy::immediate(4)))
    }

    fn repos() -> (TargetRepository, TargetRepository) {
        (
            TargetRepository::new("github.com", "octo", "repo-x", "main"),
            TargetRepository::new("github.com", "octo", "repo-y", "main"),
        )
    }

    async fn run_once(
        ctx: &Arc<RunContext>,
        platform: &Arc<MemoryPlatform>,
        dry_run: bool,
    ) -> RunReport {
        let platform: Arc<dyn Platform> = platform.clone();
        run(
            Arc::clone(ctx),
            ctx.manifest.target_repositories(),
            platform,
            RunOptions {
                max_in_flight: 2,
                dry_run,
            },
            CancelSignal::never(),
        )
        .await
    }

    #[tokio::test]
    async fn test_skip_and_create_publish_only_where_needed() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[("fileA.txt", b"version 1.2.3\n")]);
        memory.add_repository(&y, &[]);

        let report = run_once(&ctx, &memory, false).await;

        assert_eq!(report.status, RunStatus::Success);
        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.status, TargetStatus::Skipped);
        assert_eq!(rx.files[0].action, SyncAction::Skip);
        assert!(rx.change_request.is_none());
        assert_eq!(memory.commits_written(&x), 0);

        let ry = report.outcome("github.com/octo/repo-y").unwrap();
        assert_eq!(ry.status, TargetStatus::Created);
        assert!(ry.commit.is_some());
        assert_eq!(
            memory.file(&y, "reposync/update", "fileA.txt").unwrap(),
            b"version 1.2.3\n".to_vec()
        );
        let crs = memory.change_requests(&y);
        assert_eq!(crs.len(), 1);
        assert_eq!(crs[0].base, "main");
        assert_eq!(crs[0].labels, vec!["automation".to_string()]);
        assert!(crs[0].body.contains("`fileA.txt`"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[("fileA.txt", b"version 1.0.0\n")]);
        memory.add_repository(&y, &[]);

        let report = run_once(&ctx, &memory, true).await;

        assert!(report.dry_run);
        assert_eq!(report.count(TargetStatus::Updated), 1);
        assert_eq!(report.count(TargetStatus::Created), 1);
        assert_eq!(memory.commits_written(&x), 0);
        assert_eq!(memory.commits_written(&y), 0);
        assert!(memory.change_requests(&y).is_empty());
    }

    #[tokio::test]
    async fn test_rerun_reuses_branch_and_change_request() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[("fileA.txt", b"version 1.0.0\n")]);
        memory.add_repository(&y, &[]);

        let first = run_once(&ctx, &memory, false).await;
        let second = run_once(&ctx, &memory, false).await;

        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(memory.commits_written(&x), 1);
        assert_eq!(memory.change_requests(&x).len(), 1);
        let first_cr = first.outcome("github.com/octo/repo-x").unwrap().change_request.clone();
        let second_x = second.outcome("github.com/octo/repo-x").unwrap();
        assert!(second_x.commit.is_none());
        assert_eq!(second_x.change_request, first_cr);
    }

    #[tokio::test]
    async fn test_converged_targets_are_skipped() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[("fileA.txt", b"version 1.0.0\n")]);
        memory.add_repository(&y, &[]);

        run_once(&ctx, &memory, false).await;
        // Merge the sync result into the default branches
        memory.push(&x, "main", &[("fileA.txt", b"version 1.2.3\n")]).unwrap();
        memory.push(&y, "main", &[("fileA.txt", b"version 1.2.3\n")]).unwrap();

        let report = run_once(&ctx, &memory, false).await;
        assert_eq!(report.count(TargetStatus::Skipped), 2);
        assert_eq!(memory.commits_written(&x), 1);
        assert_eq!(memory.commits_written(&y), 1);
    }

    #[tokio::test]
    async fn test_missing_version_fails_every_affected_target() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[]);

        let report = run_once(&ctx, &memory, false).await;

        assert_eq!(report.status, RunStatus::Failure);
        assert_eq!(report.exit_code(), 1);
        for outcome in &report.targets {
            let error = outcome.error.as_ref().unwrap();
            assert_eq!(error.kind, "render");
            assert!(error.message.contains("TOOL_VERSION"));
        }
        assert_eq!(memory.commits_written(&x), 0);
    }

    #[tokio::test]
    async fn test_one_failing_target_does_not_stop_the_other() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[]);
        memory.fail(&x, Operation::HeadCommit, PlatformError::Auth("bad token".into()), 1);

        let report = run_once(&ctx, &memory, false).await;

        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.exit_code(), 0);
        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.error.as_ref().unwrap().kind, "platform_api");
        let ry = report.outcome("github.com/octo/repo-y").unwrap();
        assert_eq!(ry.status, TargetStatus::Created);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[]);
        memory.fail(&x, Operation::WriteCommit, PlatformError::Transient("502".into()), 2);
        memory.fail(&y, Operation::ReadFile, PlatformError::Transient("timeout".into()), 3);

        let report = run_once(&ctx, &memory, false).await;

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(memory.commits_written(&x), 1);
        assert_eq!(memory.commits_written(&y), 1);
    }

    #[tokio::test]
    async fn test_conflict_when_default_branch_changes_a_planned_file() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, _) = repos();
        let memory = MemoryPlatform::new();
        memory.add_repository(&x, &[("fileA.txt", b"version 1.0.0\n")]);

        let plan = plan_target(&ctx, &memory, &x).await.unwrap();
        memory.push(&x, "main", &[("fileA.txt", b"hand edited\n")]).unwrap();

        let err = publish(&ctx, &memory, plan).await.unwrap_err();
        assert!(matches!(err, SyncError::PublishConflict { .. }));
        assert_eq!(memory.commits_written(&x), 0);
    }

    #[tokio::test]
    async fn test_unrelated_default_branch_change_is_not_a_conflict() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, _) = repos();
        let memory = MemoryPlatform::new();
        memory.add_repository(&x, &[("fileA.txt", b"version 1.0.0\n")]);

        let plan = plan_target(&ctx, &memory, &x).await.unwrap();
        memory.push(&x, "main", &[("README.md", b"hello\n")]).unwrap();

        let outcome = publish(&ctx, &memory, plan).await.unwrap();
        assert!(outcome.commit.is_some());
        assert_eq!(
            memory.file(&x, "reposync/update", "README.md").unwrap(),
            b"hello\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_foreign_commits_on_sync_branch_conflict() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[("fileA.txt", b"version 1.0.0\n")]);

        run_once(&ctx, &memory, false).await;
        memory.push(&x, "reposync/update", &[("notes.md", b"mine\n")]).unwrap();

        let report = run_once(&ctx, &memory, false).await;
        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.status, TargetStatus::Failed);
        assert_eq!(rx.error.as_ref().unwrap().kind, "publish_conflict");
        let ry = report.outcome("github.com/octo/repo-y").unwrap();
        assert_eq!(ry.status, TargetStatus::Updated);
        assert!(ry.error.is_none());
        assert_eq!(report.status, RunStatus::PartialFailure);
    }

    #[tokio::test]
    async fn test_single_foreign_commit_on_sync_branch_is_kept() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        let base = memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[("fileA.txt", b"version 1.0.0\n")]);

        // Someone else created the sync branch with one commit of their own
        let foreign = memory
            .write_commit(
                &x,
                &CommitRequest {
                    branch: "reposync/update".to_string(),
                    parent: base,
                    message: "human: wip notes".to_string(),
                    files: BTreeMap::from([("notes.md".to_string(), b"wip\n".to_vec())]),
                },
            )
            .await
            .unwrap();

        let report = run_once(&ctx, &memory, false).await;

        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.status, TargetStatus::Failed);
        assert_eq!(rx.error.as_ref().unwrap().kind, "publish_conflict");
        assert_eq!(memory.head_commit(&x, "reposync/update").await.unwrap(), Some(foreign));
        assert_eq!(
            memory.file(&x, "reposync/update", "notes.md").unwrap(),
            b"wip\n".to_vec()
        );
        assert!(memory.change_requests(&x).is_empty());

        let ry = report.outcome("github.com/octo/repo-y").unwrap();
        assert_eq!(ry.status, TargetStatus::Updated);
        assert_eq!(report.status, RunStatus::PartialFailure);
    }

    #[tokio::test]
    async fn test_removed_rule_is_dropped_from_open_change_request() {
        let dir = TempDir::new().unwrap();
        let both = r#"
            [[targets]]
            repo = "octo/repo-x"

            [[rules]]
            source = "fileA.txt"
            targets = ["octo/repo-x"]

            [[rules]]
            source = "fileB.txt"
            targets = ["octo/repo-x"]
        "#;
        let ctx = context_with(&dir, both, &[("TOOL_VERSION", "1.2.3")]);
        let (x, _) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);

        run_once(&ctx, &memory, false).await;
        assert!(memory.file(&x, "reposync/update", "fileB.txt").is_some());

        let only_a = r#"
            [[targets]]
            repo = "octo/repo-x"

            [[rules]]
            source = "fileA.txt"
            targets = ["octo/repo-x"]
        "#;
        let ctx = context_with(&dir, only_a, &[("TOOL_VERSION", "1.2.3")]);
        let report = run_once(&ctx, &memory, false).await;

        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.status, TargetStatus::Created);
        assert!(rx.commit.is_some());
        assert!(memory.file(&x, "reposync/update", "fileB.txt").is_none());
        assert_eq!(
            memory.file(&x, "reposync/update", "fileA.txt").unwrap(),
            b"version 1.2.3\n".to_vec()
        );
        assert_eq!(memory.commits_written(&x), 2);
        assert_eq!(memory.change_requests(&x).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_version_leaves_unrelated_rules_alone() {
        let dir = TempDir::new().unwrap();
        let manifest = r#"
            [[targets]]
            repo = "octo/repo-x"

            [[targets]]
            repo = "octo/repo-z"

            [[rules]]
            source = "fileA.txt"
            targets = ["octo/repo-x"]

            [[rules]]
            source = "fileB.txt"
            targets = ["octo/repo-z"]
        "#;
        let ctx = context_with(&dir, manifest, &[]);
        let (x, _) = repos();
        let z = TargetRepository::new("github.com", "octo", "repo-z", "main");
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&z, &[]);

        let report = run_once(&ctx, &memory, false).await;

        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.error.as_ref().unwrap().kind, "render");
        let rz = report.outcome("github.com/octo/repo-z").unwrap();
        assert_eq!(rz.status, TargetStatus::Created);
        assert_eq!(
            memory.file(&z, "reposync/update", "fileB.txt").unwrap(),
            b"shared notes\n".to_vec()
        );
        assert_eq!(report.status, RunStatus::PartialFailure);
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[]);

        let (handle, signal) = cancellation();
        handle.cancel();
        let platform: Arc<dyn Platform> = memory.clone();
        let report = run(
            Arc::clone(&ctx),
            ctx.manifest.target_repositories(),
            platform,
            RunOptions::default(),
            signal,
        )
        .await;

        assert_eq!(report.status, RunStatus::Failure);
        assert!(
            report
                .targets
                .iter()
                .all(|t| t.error.as_ref().unwrap().kind == "cancelled")
        );
        assert_eq!(memory.commits_written(&x), 0);
    }

    /// Holds the first `head_commit` call until released
    struct GatedPlatform {
        inner: MemoryPlatform,
        gated: AtomicBool,
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Platform for GatedPlatform {
        async fn head_commit(
            &self,
            repo: &TargetRepository,
            branch: &str,
        ) -> std::result::Result<Option<String>, PlatformError> {
            if !self.gated.swap(true, Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            self.inner.head_commit(repo, branch).await
        }

        async fn read_file(
            &self,
            repo: &TargetRepository,
            commit: &str,
            path: &str,
        ) -> std::result::Result<Option<Vec<u8>>, PlatformError> {
            self.inner.read_file(repo, commit, path).await
        }

        async fn commits_ahead(
            &self,
            repo: &TargetRepository,
            base: &str,
            head: &str,
        ) -> std::result::Result<u32, PlatformError> {
            self.inner.commits_ahead(repo, base, head).await
        }

        async fn changed_paths(
            &self,
            repo: &TargetRepository,
            base: &str,
            head: &str,
        ) -> std::result::Result<Vec<String>, PlatformError> {
            self.inner.changed_paths(repo, base, head).await
        }

        async fn commit_message(
            &self,
            repo: &TargetRepository,
            commit: &str,
        ) -> std::result::Result<String, PlatformError> {
            self.inner.commit_message(repo, commit).await
        }

        async fn write_commit(
            &self,
            repo: &TargetRepository,
            request: &CommitRequest,
        ) -> std::result::Result<String, PlatformError> {
            self.inner.write_commit(repo, request).await
        }

        async fn find_change_request(
            &self,
            repo: &TargetRepository,
            head: &str,
            base: &str,
        ) -> std::result::Result<Option<ChangeRequest>, PlatformError> {
            self.inner.find_change_request(repo, head, base).await
        }

        async fn open_change_request(
            &self,
            repo: &TargetRepository,
            draft: &ChangeRequestDraft,
        ) -> std::result::Result<ChangeRequest, PlatformError> {
            self.inner.open_change_request(repo, draft).await
        }

        async fn update_change_request(
            &self,
            repo: &TargetRepository,
            number: u64,
            draft: &ChangeRequestDraft,
        ) -> std::result::Result<ChangeRequest, PlatformError> {
            self.inner.update_change_request(repo, number, draft).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_run_lets_started_target_finish() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let z = TargetRepository::new("github.com", "octo", "repo-z", "main");
        let inner = MemoryPlatform::new();
        for repo in [&x, &y, &z] {
            inner.add_repository(repo, &[]);
        }
        let gated = Arc::new(GatedPlatform {
            inner,
            gated: AtomicBool::new(false),
            started: Notify::new(),
            release: Notify::new(),
        });

        let (handle, signal) = cancellation();
        let platform: Arc<dyn Platform> = gated.clone();
        let running = tokio::spawn(run(
            Arc::clone(&ctx),
            vec![x.clone(), y.clone(), z.clone()],
            platform,
            RunOptions {
                max_in_flight: 1,
                dry_run: false,
            },
            signal,
        ));

        // repo-x holds the only permit and is parked inside the platform
        gated.started.notified().await;
        handle.cancel();
        gated.release.notify_one();
        let report = running.await.unwrap();

        let rx = report.outcome("github.com/octo/repo-x").unwrap();
        assert_eq!(rx.status, TargetStatus::Created);
        assert!(rx.change_request.is_some());
        for id in ["github.com/octo/repo-y", "github.com/octo/repo-z"] {
            let outcome = report.outcome(id).unwrap();
            assert_eq!(outcome.status, TargetStatus::Failed);
            assert_eq!(outcome.error.as_ref().unwrap().kind, "cancelled");
        }
        assert_eq!(gated.inner.commits_written(&y), 0);
        assert_eq!(report.status, RunStatus::PartialFailure);
    }

    #[tokio::test]
    async fn test_outcomes_keep_target_order_with_single_slot() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, &[("TOOL_VERSION", "1.2.3")]);
        let (x, y) = repos();
        let memory = Arc::new(MemoryPlatform::new());
        memory.add_repository(&x, &[]);
        memory.add_repository(&y, &[]);

        let platform: Arc<dyn Platform> = memory.clone();
        let report = run(
            Arc::clone(&ctx),
            vec![y.clone(), x.clone()],
            platform,
            RunOptions {
                max_in_flight: 1,
                dry_run: false,
            },
            CancelSignal::never(),
        )
        .await;

        let order: Vec<&str> = report.targets.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(order, vec!["github.com/octo/repo-y", "github.com/octo/repo-x"]);
        assert_eq!(report.count(TargetStatus::Created), 2);
    }

    #[tokio::test]
    async fn test_cancel_signal_resolves_after_cancel() {
        let (handle, mut signal) = cancellation();
        assert!(!signal.is_cancelled());
        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.is_cancelled()
        });
        handle.cancel();
        assert!(waiter.await.unwrap());
    }
}
