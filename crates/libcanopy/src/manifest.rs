//! The `manifest.yaml` file: the desired inventory, edited by users and
//! rewritten by `import` and after a successful apply.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CanopyError, Result},
    inventory::{Inventory, Repo, Workspace},
    repospec::RepoKey,
};

/// Manifest file name under the root.
pub const FILE_NAME: &str = "manifest.yaml";

/// Current schema version.
pub const VERSION: u32 = 1;

/// Top-level manifest document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version; `0` is read as [`VERSION`].
    #[serde(default)]
    pub version: u32,
    /// Workspaces keyed by id.
    #[serde(default)]
    pub workspaces: BTreeMap<String, ManifestWorkspace>,
}

/// One workspace record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestWorkspace {
    /// Free-form description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Creation strategy tag.
    #[serde(default)]
    pub mode: String,
    /// Preset the workspace was created from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preset_name: String,
    /// Review or issue URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_url: String,
    /// Branch the workspace's repos were based on.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_branch: String,
    /// Repos in checkout order.
    #[serde(default)]
    pub repos: Vec<ManifestRepo>,
}

/// One repo record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRepo {
    /// Directory name inside the workspace.
    pub alias: String,
    /// Canonical repo key.
    pub repo_key: String,
    /// Branch to check out.
    pub branch: String,
    /// Ref a new branch is created from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_ref: String,
}

/// A single problem found by [`Manifest::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Workspace id the issue belongs to.
    pub workspace: String,
    /// Offending field, e.g. `id` or `repos[0].branch`.
    pub field: String,
    /// What is wrong.
    pub message: String,
}

impl ValidationIssue {
    /// Build an issue.
    fn new(workspace: &str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            workspace: workspace.to_string(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.workspace, self.field, self.message)
    }
}

/// `<root>/manifest.yaml`
pub fn path(root: &Path) -> PathBuf {
    root.join(FILE_NAME)
}

impl Manifest {
    /// An empty manifest at the current version.
    pub fn new() -> Self {
        Self {
            version: VERSION,
            workspaces: BTreeMap::new(),
        }
    }

    /// Read and parse the manifest under `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = path(root);
        let contents = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CanopyError::Manifest(format!(
                "{} not found, run: canopy init or canopy import",
                path.display()
            )),
            _ => CanopyError::Manifest(format!("Failed to read {}: {e}", path.display())),
        })?;
        let mut manifest: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&contents).map_err(|e| {
                CanopyError::Manifest(format!("Failed to parse {}: {e}", path.display()))
            })?
        };
        if manifest.version == 0 {
            manifest.version = VERSION;
        }
        Ok(manifest)
    }

    /// Write the manifest under `root`, replacing the file atomically.
    pub fn save(&self, root: &Path) -> Result<()> {
        let mut manifest = self.clone();
        if manifest.version == 0 {
            manifest.version = VERSION;
        }
        let encoded = serde_yaml::to_string(&manifest)
            .map_err(|e| CanopyError::Manifest(format!("Failed to encode manifest: {e}")))?;
        let path = path(root);
        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Check every workspace and repo record, returning all issues found.
    ///
    /// Besides per-record checks, a branch of a repo can be checked out by
    /// only one worktree, so each `(repo_key, branch)` pair may appear once.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut checkouts: HashMap<(String, &str), String> = HashMap::new();
        for (id, workspace) in &self.workspaces {
            if let Some(problem) = invalid_dir_name(id) {
                issues.push(ValidationIssue::new(id, "id", problem));
            }
            let mut aliases = HashSet::new();
            for (i, repo) in workspace.repos.iter().enumerate() {
                let field = |name: &str| format!("repos[{i}].{name}");
                let alias = repo.alias.as_str();
                if let Some(problem) = invalid_dir_name(alias) {
                    issues.push(ValidationIssue::new(id, field("alias"), problem));
                } else if !aliases.insert(alias) {
                    issues.push(ValidationIssue::new(
                        id,
                        field("alias"),
                        format!("duplicate alias '{alias}'"),
                    ));
                }
                let key = match RepoKey::parse(&repo.repo_key) {
                    Ok(key) if key.to_string() == repo.repo_key => Some(key),
                    Ok(key) => {
                        issues.push(ValidationIssue::new(
                            id,
                            field("repo_key"),
                            format!("not canonical, expected '{key}'"),
                        ));
                        None
                    }
                    Err(e) => {
                        issues.push(ValidationIssue::new(id, field("repo_key"), e.to_string()));
                        None
                    }
                };
                if let Some(problem) = invalid_branch(&repo.branch) {
                    issues.push(ValidationIssue::new(id, field("branch"), problem));
                    continue;
                }
                let Some(key) = key else {
                    continue;
                };
                if let Some(first) = checkouts.get(&(key.to_string(), repo.branch.as_str())) {
                    issues.push(ValidationIssue::new(
                        id,
                        field("branch"),
                        format!("'{}' of {key} is already checked out by {first}", repo.branch),
                    ));
                } else {
                    checkouts.insert((key.to_string(), repo.branch.as_str()), format!("{id}/{alias}"));
                }
            }
        }
        issues
    }

    /// Convert into a normalized inventory.
    pub fn to_inventory(&self) -> Inventory {
        self.workspaces
            .iter()
            .map(|(id, ws)| Workspace {
                id: id.trim().to_string(),
                description: ws.description.trim().to_string(),
                mode: ws.mode.trim().to_string(),
                preset_name: ws.preset_name.trim().to_string(),
                source_url: ws.source_url.trim().to_string(),
                base_branch: ws.base_branch.trim().to_string(),
                repos: ws
                    .repos
                    .iter()
                    .map(|repo| Repo {
                        alias: repo.alias.trim().to_string(),
                        repo_key: repo.repo_key.trim().to_string(),
                        branch: repo.branch.trim().to_string(),
                        base_ref: repo.base_ref.trim().to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Build a manifest describing an inventory.
    pub fn from_inventory(inventory: &Inventory, version: u32) -> Self {
        let workspaces = inventory
            .iter()
            .map(|ws| {
                let record = ManifestWorkspace {
                    description: ws.description.clone(),
                    mode: ws.mode.clone(),
                    preset_name: ws.preset_name.clone(),
                    source_url: ws.source_url.clone(),
                    base_branch: ws.base_branch.clone(),
                    repos: ws
                        .repos
                        .iter()
                        .map(|repo| ManifestRepo {
                            alias: repo.alias.clone(),
                            repo_key: repo.repo_key.clone(),
                            branch: repo.branch.clone(),
                            base_ref: repo.base_ref.clone(),
                        })
                        .collect(),
                };
                (ws.id.clone(), record)
            })
            .collect();
        Self {
            version: if version == 0 { VERSION } else { version },
            workspaces,
        }
    }
}

/// Reason a workspace id or alias cannot be used as a directory name.
fn invalid_dir_name(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        Some("must not be empty")
    } else if name != name.trim() {
        Some("must not have leading or trailing whitespace")
    } else if name.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if name.starts_with('.') {
        Some("must not start with '.'")
    } else {
        None
    }
}

/// Reason a branch name is not a plausible git ref.
fn invalid_branch(branch: &str) -> Option<&'static str> {
    if branch.is_empty() {
        return Some("must not be empty");
    }
    if branch.contains(char::is_whitespace) || branch.contains(char::is_control) {
        return Some("must not contain whitespace");
    }
    if branch.contains("..") || branch.contains("@{") || branch.contains("//") {
        return Some("is not a valid ref name");
    }
    if branch.contains(['~', '^', ':', '?', '*', '[', '\\']) {
        return Some("contains a character git forbids in ref names");
    }
    if branch.starts_with(['-', '/']) || branch.ends_with(['/', '.']) || branch.ends_with(".lock") {
        return Some("is not a valid ref name");
    }
    None
}
