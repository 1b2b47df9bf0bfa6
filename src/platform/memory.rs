//! In-memory platform
//!
//! Keeps repositories, branches, commits and change requests in a map so the
//! engine can be exercised without a network. Failures can be queued per
//! repository and operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{ChangeRequest, ChangeRequestDraft, CommitRequest, Platform, PlatformError};
use crate::manifest::TargetRepository;

/// Platform calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    HeadCommit,
    ReadFile,
    CommitsAhead,
    ChangedPaths,
    CommitMessage,
    WriteCommit,
    FindChangeRequest,
    OpenChangeRequest,
    UpdateChangeRequest,
}

#[derive(Debug, Clone)]
struct Commit {
    parent: Option<String>,
    message: String,
    files: BTreeMap<String, Vec<u8>>,
}

/// A change request as stored by [`MemoryPlatform`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChangeRequest {
    pub number: u64,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub open: bool,
}

#[derive(Debug, Default)]
struct Repository {
    branches: HashMap<String, String>,
    change_requests: Vec<StoredChangeRequest>,
    commits_written: usize,
}

#[derive(Debug, Default)]
struct State {
    next_commit: u64,
    commits: HashMap<String, Commit>,
    repositories: HashMap<String, Repository>,
    failures: HashMap<(String, Operation), VecDeque<PlatformError>>,
}

impl State {
    fn repository(&self, repo: &TargetRepository) -> Result<&Repository, PlatformError> {
        self.repositories
            .get(&repo.id())
            .ok_or_else(|| PlatformError::NotFound(repo.id()))
    }

    fn repository_mut(&mut self, repo: &TargetRepository) -> Result<&mut Repository, PlatformError> {
        self.repositories
            .get_mut(&repo.id())
            .ok_or_else(|| PlatformError::NotFound(repo.id()))
    }

    fn take_failure(&mut self, repo: &TargetRepository, op: Operation) -> Result<(), PlatformError> {
        match self
            .failures
            .get_mut(&(repo.id(), op))
            .and_then(VecDeque::pop_front)
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn new_commit(&mut self, commit: Commit) -> String {
        self.next_commit += 1;
        let id = format!("{:040x}", self.next_commit);
        self.commits.insert(id.clone(), commit);
        id
    }

    /// Branch name or commit id to commit id
    fn resolve(&self, repo: &Repository, reference: &str) -> Option<String> {
        repo.branches
            .get(reference)
            .cloned()
            .or_else(|| self.commits.contains_key(reference).then(|| reference.to_string()))
    }

    fn ancestry(&self, commit: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(commit.to_string());
        while let Some(id) = current {
            current = self.commits.get(&id).and_then(|c| c.parent.clone());
            chain.push(id);
        }
        chain
    }
}

#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a repository whose default branch holds `files`
    pub fn add_repository(&self, repo: &TargetRepository, files: &[(&str, &[u8])]) -> String {
        let mut state = self.state();
        let id = state.new_commit(Commit {
            parent: None,
            message: "initial commit".to_string(),
            files: to_files(files),
        });
        let mut repository = Repository::default();
        repository
            .branches
            .insert(repo.default_branch.clone(), id.clone());
        state.repositories.insert(repo.id(), repository);
        id
    }

    /// Commit `files` on top of `branch` as if someone outside the sync did it
    pub fn push(
        &self,
        repo: &TargetRepository,
        branch: &str,
        files: &[(&str, &[u8])],
    ) -> Result<String, PlatformError> {
        let mut state = self.state();
        let parent = state
            .repository(repo)?
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(branch.to_string()))?;
        let mut snapshot = state
            .commits
            .get(&parent)
            .map(|c| c.files.clone())
            .unwrap_or_default();
        snapshot.extend(to_files(files));
        let id = state.new_commit(Commit {
            parent: Some(parent),
            message: "outside change".to_string(),
            files: snapshot,
        });
        state
            .repository_mut(repo)?
            .branches
            .insert(branch.to_string(), id.clone());
        Ok(id)
    }

    /// Content of `path` at the tip of `branch`
    pub fn file(&self, repo: &TargetRepository, branch: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state();
        let commit = state.repositories.get(&repo.id())?.branches.get(branch)?;
        state.commits.get(commit)?.files.get(path).cloned()
    }

    /// Message of the commit at the tip of `branch`
    pub fn head_message(&self, repo: &TargetRepository, branch: &str) -> Option<String> {
        let state = self.state();
        let commit = state.repositories.get(&repo.id())?.branches.get(branch)?;
        state.commits.get(commit).map(|c| c.message.clone())
    }

    /// Number of commits written through [`Platform::write_commit`]
    pub fn commits_written(&self, repo: &TargetRepository) -> usize {
        self.state()
            .repositories
            .get(&repo.id())
            .map_or(0, |r| r.commits_written)
    }

    pub fn change_requests(&self, repo: &TargetRepository) -> Vec<StoredChangeRequest> {
        self.state()
            .repositories
            .get(&repo.id())
            .map(|r| r.change_requests.clone())
            .unwrap_or_default()
    }

    /// Make the next `times` calls of `op` against `repo` fail with `error`
    pub fn fail(&self, repo: &TargetRepository, op: Operation, error: PlatformError, times: usize) {
        let mut state = self.state();
        let queue = state.failures.entry((repo.id(), op)).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }
}

fn to_files(files: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
    files
        .iter()
        .map(|(path, content)| (path.to_string(), content.to_vec()))
        .collect()
}

fn to_change_request(repo: &TargetRepository, stored: &StoredChangeRequest) -> ChangeRequest {
    ChangeRequest {
        number: stored.number,
        url: format!("memory://{}/pull/{}", repo.id(), stored.number),
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn head_commit(
        &self,
        repo: &TargetRepository,
        branch: &str,
    ) -> Result<Option<String>, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::HeadCommit)?;
        Ok(state.repository(repo)?.branches.get(branch).cloned())
    }

    async fn read_file(
        &self,
        repo: &TargetRepository,
        commit: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::ReadFile)?;
        state.repository(repo)?;
        let commit = state
            .commits
            .get(commit)
            .ok_or_else(|| PlatformError::NotFound(commit.to_string()))?;
        Ok(commit.files.get(path).cloned())
    }

    async fn commits_ahead(
        &self,
        repo: &TargetRepository,
        base: &str,
        head: &str,
    ) -> Result<u32, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::CommitsAhead)?;
        let repository = state.repository(repo)?;
        let base_id = state
            .resolve(repository, base)
            .ok_or_else(|| PlatformError::NotFound(base.to_string()))?;
        let head_id = state
            .resolve(repository, head)
            .ok_or_else(|| PlatformError::NotFound(head.to_string()))?;

        let reachable: HashSet<String> = state.ancestry(&base_id).into_iter().collect();
        let ahead = state
            .ancestry(&head_id)
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .count();
        Ok(ahead as u32)
    }

    async fn changed_paths(
        &self,
        repo: &TargetRepository,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::ChangedPaths)?;
        let state = &*state;
        let repository = state.repository(repo)?;
        let snapshot = |reference: &str| {
            state
                .resolve(repository, reference)
                .and_then(|id| state.commits.get(&id))
                .map(|c| &c.files)
                .ok_or_else(|| PlatformError::NotFound(reference.to_string()))
        };
        let base_files = snapshot(base)?;
        let head_files = snapshot(head)?;

        let paths: BTreeSet<&String> = base_files.keys().chain(head_files.keys()).collect();
        Ok(paths
            .into_iter()
            .filter(|path| base_files.get(*path) != head_files.get(*path))
            .cloned()
            .collect())
    }

    async fn commit_message(
        &self,
        repo: &TargetRepository,
        commit: &str,
    ) -> Result<String, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::CommitMessage)?;
        state.repository(repo)?;
        state
            .commits
            .get(commit)
            .map(|c| c.message.clone())
            .ok_or_else(|| PlatformError::NotFound(commit.to_string()))
    }

    async fn write_commit(
        &self,
        repo: &TargetRepository,
        request: &CommitRequest,
    ) -> Result<String, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::WriteCommit)?;
        state.repository(repo)?;
        let mut snapshot = state
            .commits
            .get(&request.parent)
            .ok_or_else(|| PlatformError::NotFound(request.parent.clone()))?
            .files
            .clone();
        snapshot.extend(request.files.clone());

        let id = state.new_commit(Commit {
            parent: Some(request.parent.clone()),
            message: request.message.clone(),
            files: snapshot,
        });
        let repository = state.repository_mut(repo)?;
        repository.branches.insert(request.branch.clone(), id.clone());
        repository.commits_written += 1;
        Ok(id)
    }

    async fn find_change_request(
        &self,
        repo: &TargetRepository,
        head: &str,
        base: &str,
    ) -> Result<Option<ChangeRequest>, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::FindChangeRequest)?;
        Ok(state
            .repository(repo)?
            .change_requests
            .iter()
            .find(|cr| cr.open && cr.head == head && cr.base == base)
            .map(|cr| to_change_request(repo, cr)))
    }

    async fn open_change_request(
        &self,
        repo: &TargetRepository,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::OpenChangeRequest)?;
        let repository = state.repository_mut(repo)?;
        if !repository.branches.contains_key(&draft.head) {
            return Err(PlatformError::Rejected {
                status: 422,
                message: format!("head branch {} does not exist", draft.head),
            });
        }
        let stored = StoredChangeRequest {
            number: repository.change_requests.len() as u64 + 1,
            head: draft.head.clone(),
            base: draft.base.clone(),
            title: draft.title.clone(),
            body: draft.body.clone(),
            labels: draft.labels.clone(),
            open: true,
        };
        let created = to_change_request(repo, &stored);
        repository.change_requests.push(stored);
        Ok(created)
    }

    async fn update_change_request(
        &self,
        repo: &TargetRepository,
        number: u64,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PlatformError> {
        let mut state = self.state();
        state.take_failure(repo, Operation::UpdateChangeRequest)?;
        let repository = state.repository_mut(repo)?;
        let stored = repository
            .change_requests
            .iter_mut()
            .find(|cr| cr.number == number)
            .ok_or_else(|| PlatformError::NotFound(format!("change request #{number}")))?;
        stored.title = draft.title.clone();
        stored.body = draft.body.clone();
        for label in &draft.labels {
            if !stored.labels.contains(label) {
                stored.labels.push(label.clone());
            }
        }
        Ok(to_change_request(repo, stored))
    }
}
