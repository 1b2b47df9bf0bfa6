//! Manifest parsing for reposync
//!
//! The manifest lists the canonical files of the sync directory, the target
//! repositories that consume them, and how the change request opened in
//! each target should look. It can be written in TOML or YAML; both map
//! onto the same schema.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

/// Default manifest file name
pub const MANIFEST_FILE_NAME: &str = "reposync.toml";

/// Default sync directory name
pub const DEFAULT_SYNC_DIR: &str = ".sync";

/// Host used for target references that omit one
pub const DEFAULT_HOST: &str = "github.com";

/// Root manifest structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Location the manifest was loaded from
    #[serde(skip)]
    pub path: PathBuf,

    /// Directory containing the canonical files (relative to the manifest)
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// Version definitions file (relative to the manifest)
    #[serde(default = "default_versions_file")]
    pub versions: String,

    /// Maximum number of targets processed at the same time
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// How commits and change requests are written in each target
    #[serde(default)]
    pub change_request: ChangeRequestConfig,

    /// Repositories receiving synced files
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    /// Source file to destination mappings, in evaluation order
    #[serde(default)]
    pub rules: Vec<SyncRule>,
}

fn default_source_dir() -> String {
    "files".to_string()
}

fn default_versions_file() -> String {
    "versions.toml".to_string()
}

fn default_max_in_flight() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Declaration of one target repository
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// `owner/name`
    pub repo: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub default_branch: Option<String>,
}

/// A mapping from one canonical file to one or more targets
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncRule {
    /// Source path (relative to source_dir)
    pub source: String,

    /// Destination path inside each target (defaults to `source`)
    #[serde(default)]
    pub destination: Option<String>,

    /// Substitute version placeholders before writing
    #[serde(default = "default_true")]
    pub template: bool,

    /// Target references, `owner/name` or `host/owner/name`
    #[serde(default)]
    pub targets: Vec<String>,

    /// Per-target adjustments keyed by target reference
    #[serde(default)]
    pub overrides: BTreeMap<String, DestinationOverride>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DestinationOverride {
    /// Write the file under a different path in this target
    #[serde(default)]
    pub destination: Option<String>,

    /// Do not sync this rule into this target
    #[serde(default)]
    pub exclude: bool,
}

/// Commit and change request settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeRequestConfig {
    /// Branch carrying the sync commit in every target
    #[serde(default = "default_branch_name")]
    pub branch: String,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_branch_name() -> String {
    "reposync/update".to_string()
}

fn default_title() -> String {
    "Sync shared files".to_string()
}

fn default_commit_message() -> String {
    "chore: sync shared files".to_string()
}

impl Default for ChangeRequestConfig {
    fn default() -> Self {
        Self {
            branch: default_branch_name(),
            title: default_title(),
            body: None,
            commit_message: default_commit_message(),
            labels: Vec::new(),
        }
    }
}

/// A repository that receives synchronized files
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetRepository {
    pub host: String,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

impl TargetRepository {
    pub fn new(
        host: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            owner: owner.into(),
            name: name.into(),
            default_branch: default_branch.into(),
        }
    }

    /// `owner/name`
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// `host/owner/name`
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.host, self.owner, self.name)
    }

    /// Whether a rule's target reference points at this repository
    pub fn matches(&self, reference: &str) -> bool {
        let reference = reference.trim().trim_end_matches('/');
        reference.eq_ignore_ascii_case(&self.id()) || reference.eq_ignore_ascii_case(&self.slug())
    }
}

impl fmt::Display for TargetRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// One rule as it applies to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBinding {
    /// Position of the rule in the manifest
    pub rule_index: usize,
    /// Source path as written in the manifest
    pub source: String,
    /// Absolute path of the source file
    pub source_path: PathBuf,
    /// Destination path inside the target
    pub destination: String,
    pub template: bool,
}

impl Manifest {
    /// Load, parse and validate a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&content, path)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse manifest content. The format follows the extension of `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let parse_error = |message: String| SyncError::ManifestParse {
            path: path.to_path_buf(),
            message,
        };

        let mut manifest: Manifest = if is_yaml(path) {
            serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?
        } else {
            toml::from_str(content).map_err(|e| parse_error(e.to_string()))?
        };
        manifest.path = path.to_path_buf();
        Ok(manifest)
    }

    /// Find a manifest by searching up from `start_dir`
    pub fn find_manifest(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();

        loop {
            let nested = current.join(DEFAULT_SYNC_DIR).join(MANIFEST_FILE_NAME);
            if nested.exists() {
                return Some(nested);
            }

            let root = current.join(MANIFEST_FILE_NAME);
            if root.exists() {
                return Some(root);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Directory holding the manifest
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Directory holding the canonical files
    pub fn source_dir(&self) -> PathBuf {
        self.base_dir().join(&self.source_dir)
    }

    /// Path of the version definitions file
    pub fn versions_path(&self) -> PathBuf {
        self.base_dir().join(&self.versions)
    }

    /// Declared targets, in manifest order
    pub fn target_repositories(&self) -> Vec<TargetRepository> {
        self.targets.iter().filter_map(to_repository).collect()
    }

    /// Rules that apply to `target`, in manifest order, with overrides applied
    pub fn rules_for(&self, target: &TargetRepository) -> Vec<RuleBinding> {
        let source_dir = self.source_dir();
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.targets.iter().any(|r| target.matches(r)))
            .filter_map(|(rule_index, rule)| {
                let over = rule
                    .overrides
                    .iter()
                    .find(|(reference, _)| target.matches(reference))
                    .map(|(_, o)| o);

                if over.is_some_and(|o| o.exclude) {
                    return None;
                }

                let destination = over
                    .and_then(|o| o.destination.clone())
                    .or_else(|| rule.destination.clone())
                    .unwrap_or_else(|| rule.source.clone());

                Some(RuleBinding {
                    rule_index,
                    source: rule.source.clone(),
                    source_path: source_dir.join(&rule.source),
                    destination: normalize_repo_path(&destination),
                    template: rule.template,
                })
            })
            .collect()
    }

    /// Check the manifest against the files on disk. Every problem found is
    /// reported at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.max_in_flight == 0 {
            problems.push("max_in_flight must be at least 1".to_string());
        }
        if self.change_request.branch.trim().is_empty() {
            problems.push("change_request.branch must not be empty".to_string());
        }

        let mut declared: HashMap<String, usize> = HashMap::new();
        for (i, target) in self.targets.iter().enumerate() {
            match to_repository(target) {
                Some(repo) => {
                    if declared.insert(repo.id().to_lowercase(), i).is_some() {
                        problems.push(format!("target {} is declared more than once", repo));
                    }
                }
                None => problems.push(format!(
                    "target `{}` must be written as owner/name",
                    target.repo
                )),
            }
        }
        let repositories = self.target_repositories();

        let source_dir = self.source_dir();
        let mut written: BTreeSet<(String, String)> = BTreeSet::new();

        for (i, rule) in self.rules.iter().enumerate() {
            let label = format!("rule {} ({})", i + 1, rule.source);

            if !is_relative_inside(&rule.source) {
                problems.push(format!("{label}: source must be a relative path inside the source directory"));
            } else {
                let source_path = source_dir.join(&rule.source);
                if !source_path.is_file() {
                    problems.push(format!(
                        "{label}: source {} does not exist or is not a file",
                        source_path.display()
                    ));
                }
            }

            if rule.targets.is_empty() {
                problems.push(format!("{label}: destination set is empty"));
            }

            for reference in &rule.targets {
                let matching = repositories.iter().filter(|r| r.matches(reference)).count();
                match matching {
                    0 => problems.push(format!("{label}: unknown target `{reference}`")),
                    1 => {}
                    _ => problems.push(format!("{label}: ambiguous target `{reference}`")),
                }
            }

            for reference in rule.overrides.keys() {
                if !rule.targets.iter().any(|t| same_reference(t, reference, &repositories)) {
                    problems.push(format!(
                        "{label}: override for `{reference}` which the rule does not target"
                    ));
                }
            }

            let destinations = std::iter::once(rule.destination.as_deref())
                .chain(rule.overrides.values().map(|o| o.destination.as_deref()));
            for destination in destinations.flatten() {
                if !is_relative_inside(destination) {
                    problems.push(format!(
                        "{label}: destination `{destination}` must be a relative path inside the repository"
                    ));
                }
            }
        }

        for repo in &repositories {
            for binding in self.rules_for(repo) {
                if !written.insert((repo.id(), binding.destination.clone())) {
                    problems.push(format!(
                        "{} is written by more than one rule in {}",
                        binding.destination, repo
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ManifestValidation {
                path: self.path.clone(),
                problems,
            })
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
}

fn to_repository(target: &TargetConfig) -> Option<TargetRepository> {
    let (owner, name) = target.repo.trim().split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(TargetRepository::new(
        target.host.as_deref().unwrap_or(DEFAULT_HOST),
        owner,
        name,
        target.default_branch.as_deref().unwrap_or("main"),
    ))
}

fn same_reference(a: &str, b: &str, repositories: &[TargetRepository]) -> bool {
    repositories.iter().any(|r| r.matches(a) && r.matches(b))
}

/// Relative, non-empty, and never escaping its root
fn is_relative_inside(path: &str) -> bool {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return false;
    }
    Path::new(trimmed)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Repository paths always use `/` and never start with `./`
pub fn normalize_repo_path(path: &str) -> String {
    path.trim()
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
