use std::collections::BTreeMap;

/// A repository checked out inside a workspace.
///
/// Diffing identifies repos by `alias`; equality also compares the repo key
/// and branch. `base_ref` is informational only.
#[derive(Debug, Clone, Default)]
pub struct Repo {
    /// Directory name inside the workspace, unique within it.
    pub alias: String,
    /// Canonical `host/owner/name.git` identity.
    pub repo_key: String,
    /// Local branch checked out in the worktree.
    pub branch: String,
    /// Ref the branch was created from.
    pub base_ref: String,
}

impl Repo {
    /// Create a repo entry without a base ref.
    pub fn new(
        alias: impl Into<String>,
        repo_key: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            repo_key: repo_key.into(),
            branch: branch.into(),
            base_ref: String::new(),
        }
    }
}

impl PartialEq for Repo {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias && self.repo_key == other.repo_key && self.branch == other.branch
    }
}

impl Eq for Repo {}

/// A named directory grouping one or more worktrees.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    /// Unique, case-sensitive identifier; also the directory name.
    pub id: String,
    /// Free-form description.
    pub description: String,
    /// Creation strategy tag, e.g. `review`, `issue`, `manual`.
    pub mode: String,
    /// Preset the workspace was created from.
    pub preset_name: String,
    /// URL of the review or issue the workspace tracks.
    pub source_url: String,
    /// Branch the workspace's repos were based on.
    pub base_branch: String,
    /// Repos in declaration order.
    pub repos: Vec<Repo>,
}

impl Workspace {
    /// Create an empty workspace with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Append a repo, returning the workspace for chaining.
    pub fn with_repo(mut self, repo: Repo) -> Self {
        self.repos.push(repo);
        self
    }

    /// Look up a repo by alias.
    pub fn repo(&self, alias: &str) -> Option<&Repo> {
        self.repos.iter().find(|repo| repo.alias == alias)
    }
}

impl PartialEq for Workspace {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
            && self.mode == other.mode
            && self.preset_name == other.preset_name
            && self.source_url == other.source_url
            && self.repos == other.repos
    }
}

impl Eq for Workspace {}

/// Mapping from workspace id to workspace.
///
/// Backed by a `BTreeMap` so iteration is always in id order, which keeps
/// diffs and rendered plans deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Workspaces keyed by id.
    workspaces: BTreeMap<String, Workspace>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a workspace, replacing any existing entry with the same id.
    pub fn insert(&mut self, workspace: Workspace) {
        self.workspaces.insert(workspace.id.clone(), workspace);
    }

    /// Look up a workspace by id.
    pub fn get(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.get(id)
    }

    /// Whether a workspace with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.workspaces.contains_key(id)
    }

    /// Workspace ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.workspaces.keys().map(String::as_str)
    }

    /// Workspaces in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.values()
    }

    /// Number of workspaces.
    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    /// Whether the inventory is empty.
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}

impl FromIterator<Workspace> for Inventory {
    fn from_iter<I: IntoIterator<Item = Workspace>>(iter: I) -> Self {
        let mut inventory = Self::new();
        for workspace in iter {
            inventory.insert(workspace);
        }
        inventory
    }
}
