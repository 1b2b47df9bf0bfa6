//! GitHub REST adapter
//!
//! Commits are written through the git data API (blobs, tree, commit, ref)
//! so no local clone is needed. Pull requests play the role of change
//! requests.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ChangeRequest, ChangeRequestDraft, CommitRequest, Platform, PlatformError};
use crate::manifest::{DEFAULT_HOST, TargetRepository};

const USER_AGENT: &str = concat!("reposync/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

pub struct GitHubPlatform {
    client: Client,
    api_url: Option<Url>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    object: ShaObject,
}

#[derive(Debug, Deserialize)]
struct ShaObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    tree: ShaObject,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Comparison {
    ahead_by: u32,
    #[serde(default)]
    files: Vec<ComparedFile>,
}

#[derive(Debug, Deserialize)]
struct ComparedFile {
    filename: String,
    #[serde(default)]
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

#[derive(Debug, Serialize)]
struct NewBlob<'a> {
    content: String,
    encoding: &'a str,
}

#[derive(Debug, Serialize, PartialEq)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    sha: String,
}

#[derive(Debug, Serialize)]
struct NewTree<'a> {
    base_tree: &'a str,
    tree: Vec<TreeEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct NewCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct NewRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct MoveRef<'a> {
    sha: &'a str,
    force: bool,
}

#[derive(Debug, Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct EditPullRequest<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct Labels<'a> {
    labels: &'a [String],
}

/// API root for a host: `api.github.com` for github.com, `/api/v3` for
/// GitHub Enterprise Server
pub fn api_url_for_host(host: &str) -> Result<Url, url::ParseError> {
    if host.eq_ignore_ascii_case(DEFAULT_HOST) {
        Url::parse("https://api.github.com")
    } else {
        Url::parse(&format!("https://{host}/api/v3"))
    }
}

/// Map an unsuccessful HTTP status onto a platform error
pub(crate) fn classify_status(status: u16, rate_limited: bool, message: String) -> PlatformError {
    match status {
        401 => PlatformError::Auth(message),
        403 if rate_limited => PlatformError::Transient(format!("rate limited: {message}")),
        403 => PlatformError::Auth(message),
        404 => PlatformError::NotFound(message),
        409 => PlatformError::Conflict(message),
        429 | 500..=599 => PlatformError::Transient(format!("HTTP {status}: {message}")),
        _ => PlatformError::Rejected { status, message },
    }
}

fn transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_decode() {
        PlatformError::Rejected {
            status: e.status().map_or(0, |s| s.as_u16()),
            message: format!("unexpected response body: {e}"),
        }
    } else {
        PlatformError::Transient(e.to_string())
    }
}

fn not_found_as_none<T>(result: Result<T, PlatformError>) -> Result<Option<T>, PlatformError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(PlatformError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Percent-encode every segment of a repository path, keeping the slashes
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every path a comparison touches; renames count on both sides
fn comparison_paths(files: Vec<ComparedFile>) -> Vec<String> {
    let mut paths: Vec<String> = files
        .into_iter()
        .flat_map(|f| std::iter::once(f.filename).chain(f.previous_filename))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

impl GitHubPlatform {
    /// `api_url` overrides the per-host API root (useful for proxies and tests)
    pub fn new(api_url: Option<Url>, token: Option<String>) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MEDIA_TYPE));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| PlatformError::Rejected {
                status: 0,
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn repo_url(&self, repo: &TargetRepository, tail: &str) -> Result<Url, PlatformError> {
        let base = match &self.api_url {
            Some(url) => url.clone(),
            None => api_url_for_host(&repo.host).map_err(|e| PlatformError::Rejected {
                status: 0,
                message: format!("invalid host {}: {e}", repo.host),
            })?,
        };
        let url = format!(
            "{}/repos/{}/{}/{}",
            base.as_str().trim_end_matches('/'),
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name),
            tail
        );
        Url::parse(&url).map_err(|e| PlatformError::Rejected {
            status: 0,
            message: format!("invalid URL {url}: {e}"),
        })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, PlatformError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .is_some_and(|v| v.as_bytes() == b"0");
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), rate_limited, message))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, PlatformError> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(transport_error)
    }

    async fn create_blob(&self, repo: &TargetRepository, content: &[u8]) -> Result<String, PlatformError> {
        let url = self.repo_url(repo, "git/blobs")?;
        let blob = NewBlob {
            content: STANDARD.encode(content),
            encoding: "base64",
        };
        let created: ShaObject = self
            .send_json(self.request(Method::POST, url).json(&blob))
            .await?;
        Ok(created.sha)
    }

    async fn add_labels(
        &self,
        repo: &TargetRepository,
        number: u64,
        labels: &[String],
    ) -> Result<(), PlatformError> {
        if labels.is_empty() {
            return Ok(());
        }
        let url = self.repo_url(repo, &format!("issues/{number}/labels"))?;
        self.send(self.request(Method::POST, url).json(&Labels { labels }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn head_commit(
        &self,
        repo: &TargetRepository,
        branch: &str,
    ) -> Result<Option<String>, PlatformError> {
        let url = self.repo_url(repo, &format!("git/ref/heads/{}", encode_path(branch)))?;
        let found: Option<RefObject> =
            not_found_as_none(self.send_json(self.request(Method::GET, url)).await)?;
        Ok(found.map(|r| r.object.sha))
    }

    async fn read_file(
        &self,
        repo: &TargetRepository,
        commit: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, PlatformError> {
        let mut url = self.repo_url(repo, &format!("contents/{}", encode_path(path)))?;
        url.query_pairs_mut().append_pair("ref", commit);

        let request = self
            .request(Method::GET, url)
            .header(ACCEPT, RAW_MEDIA_TYPE);
        let Some(response) = not_found_as_none(self.send(request).await)? else {
            return Ok(None);
        };
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(Some(bytes.to_vec()))
    }

    async fn commits_ahead(
        &self,
        repo: &TargetRepository,
        base: &str,
        head: &str,
    ) -> Result<u32, PlatformError> {
        let url = self.repo_url(
            repo,
            &format!("compare/{}...{}", encode_path(base), encode_path(head)),
        )?;
        let comparison: Comparison = self.send_json(self.request(Method::GET, url)).await?;
        Ok(comparison.ahead_by)
    }

    async fn changed_paths(
        &self,
        repo: &TargetRepository,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let url = self.repo_url(
            repo,
            &format!("compare/{}...{}", encode_path(base), encode_path(head)),
        )?;
        let comparison: Comparison = self.send_json(self.request(Method::GET, url)).await?;
        Ok(comparison_paths(comparison.files))
    }

    async fn commit_message(
        &self,
        repo: &TargetRepository,
        commit: &str,
    ) -> Result<String, PlatformError> {
        let url = self.repo_url(repo, &format!("git/commits/{commit}"))?;
        let found: GitCommit = self.send_json(self.request(Method::GET, url)).await?;
        Ok(found.message)
    }

    async fn write_commit(
        &self,
        repo: &TargetRepository,
        request: &CommitRequest,
    ) -> Result<String, PlatformError> {
        let parent_url = self.repo_url(repo, &format!("git/commits/{}", request.parent))?;
        let parent: GitCommit = self
            .send_json(self.request(Method::GET, parent_url))
            .await?;

        let mut entries = Vec::with_capacity(request.files.len());
        for (path, content) in &request.files {
            let sha = self.create_blob(repo, content).await?;
            entries.push(TreeEntry {
                path: path.as_str(),
                mode: "100644",
                kind: "blob",
                sha,
            });
        }

        let tree_url = self.repo_url(repo, "git/trees")?;
        let tree: ShaObject = self
            .send_json(self.request(Method::POST, tree_url).json(&NewTree {
                base_tree: &parent.tree.sha,
                tree: entries,
            }))
            .await?;

        let commit_url = self.repo_url(repo, "git/commits")?;
        let commit: ShaObject = self
            .send_json(self.request(Method::POST, commit_url).json(&NewCommit {
                message: &request.message,
                tree: &tree.sha,
                parents: [request.parent.as_str()],
            }))
            .await?;

        if self.head_commit(repo, &request.branch).await?.is_some() {
            let url = self.repo_url(
                repo,
                &format!("git/refs/heads/{}", encode_path(&request.branch)),
            )?;
            self.send(self.request(Method::PATCH, url).json(&MoveRef {
                sha: &commit.sha,
                force: true,
            }))
            .await?;
        } else {
            let url = self.repo_url(repo, "git/refs")?;
            self.send(self.request(Method::POST, url).json(&NewRef {
                name: format!("refs/heads/{}", request.branch),
                sha: commit.sha.clone(),
            }))
            .await?;
        }

        tracing::debug!(repo = %repo, commit = %commit.sha, branch = %request.branch, "Wrote commit");
        Ok(commit.sha)
    }

    async fn find_change_request(
        &self,
        repo: &TargetRepository,
        head: &str,
        base: &str,
    ) -> Result<Option<ChangeRequest>, PlatformError> {
        let mut url = self.repo_url(repo, "pulls")?;
        url.query_pairs_mut()
            .append_pair("state", "open")
            .append_pair("head", &format!("{}:{}", repo.owner, head))
            .append_pair("base", base);

        let pulls: Vec<PullRequest> = self.send_json(self.request(Method::GET, url)).await?;
        Ok(pulls.into_iter().next().map(|p| ChangeRequest {
            number: p.number,
            url: p.html_url,
        }))
    }

    async fn open_change_request(
        &self,
        repo: &TargetRepository,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PlatformError> {
        let url = self.repo_url(repo, "pulls")?;
        let pull: PullRequest = self
            .send_json(self.request(Method::POST, url).json(&NewPullRequest {
                title: &draft.title,
                head: &draft.head,
                base: &draft.base,
                body: &draft.body,
            }))
            .await?;
        self.add_labels(repo, pull.number, &draft.labels).await?;
        Ok(ChangeRequest {
            number: pull.number,
            url: pull.html_url,
        })
    }

    async fn update_change_request(
        &self,
        repo: &TargetRepository,
        number: u64,
        draft: &ChangeRequestDraft,
    ) -> Result<ChangeRequest, PlatformError> {
        let url = self.repo_url(repo, &format!("pulls/{number}"))?;
        let pull: PullRequest = self
            .send_json(self.request(Method::PATCH, url).json(&EditPullRequest {
                title: &draft.title,
                body: &draft.body,
            }))
            .await?;
        self.add_labels(repo, pull.number, &draft.labels).await?;
        Ok(ChangeRequest {
            number: pull.number,
            url: pull.html_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(host: &str) -> TargetRepository {
        TargetRepository::new(host, "octo", "repo-x", "main")
    }

    #[test]
    fn test_api_url_for_host() {
        assert_eq!(
            api_url_for_host("github.com").unwrap().as_str(),
            "https://api.github.com/"
        );
        assert_eq!(
            api_url_for_host("ghe.example.com").unwrap().as_str(),
            "https://ghe.example.com/api/v3"
        );
    }

    #[test]
    fn test_repo_url_encodes_path_segments() {
        let platform = GitHubPlatform::new(None, None).unwrap();
        let url = platform
            .repo_url(&repo("github.com"), &format!("contents/{}", encode_path("docs/a b.md")))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octo/repo-x/contents/docs/a%20b.md"
        );
    }

    #[test]
    fn test_api_url_override() {
        let api = Url::parse("http://127.0.0.1:8080/").unwrap();
        let platform = GitHubPlatform::new(Some(api), Some("  ".into())).unwrap();
        assert!(platform.token.is_none());
        let url = platform.repo_url(&repo("ghe.example.com"), "pulls").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/repos/octo/repo-x/pulls");
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(502, false, String::new()).is_transient());
        assert!(classify_status(429, false, String::new()).is_transient());
        assert!(classify_status(403, true, String::new()).is_transient());
        assert_eq!(
            classify_status(403, false, "forbidden".into()),
            PlatformError::Auth("forbidden".into())
        );
        assert!(matches!(
            classify_status(404, false, String::new()),
            PlatformError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(422, false, String::new()),
            PlatformError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn test_comparison_paths_include_renames() {
        let comparison: Comparison = serde_json::from_str(
            r#"{
                "ahead_by": 1,
                "files": [
                    {"filename": "b.txt", "status": "modified"},
                    {"filename": "docs/a.txt", "previous_filename": "a.txt", "status": "renamed"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            comparison_paths(comparison.files),
            vec!["a.txt".to_string(), "b.txt".to_string(), "docs/a.txt".to_string()]
        );
    }

    #[test]
    fn test_tree_entry_serialization() {
        let entry = TreeEntry {
            path: "ci/rustfmt.toml",
            mode: "100644",
            kind: "blob",
            sha: "abc".into(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "blob");
        assert_eq!(value["path"], "ci/rustfmt.toml");
    }
}
