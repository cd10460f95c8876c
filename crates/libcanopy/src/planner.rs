//! Pure desired-vs-actual diffing over two in-memory inventories.
//!
//! Nothing here touches the filesystem or git, so the same change list can be
//! rendered as a plan and then used to decide what is destructive.

use std::collections::{BTreeMap, BTreeSet};

use crate::inventory::{Inventory, Repo, Workspace};

/// Kind tag shared by workspace and repo changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// Present in desired only.
    Add,
    /// Present in actual only.
    Remove,
    /// Present in both but different.
    Update,
}

/// The repo key and branch on one side of a repo change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSide {
    /// Canonical repo key.
    pub repo_key: String,
    /// Checked-out branch.
    pub branch: String,
}

impl From<&Repo> for RepoSide {
    fn from(repo: &Repo) -> Self {
        Self {
            repo_key: repo.repo_key.clone(),
            branch: repo.branch.clone(),
        }
    }
}

/// A change to one repo inside a workspace, keyed by alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoChange {
    /// The repo must be cloned into the workspace.
    Add {
        /// Repo alias.
        alias: String,
        /// Desired state.
        after: RepoSide,
    },
    /// The repo must be removed from the workspace.
    Remove {
        /// Repo alias.
        alias: String,
        /// Current state.
        before: RepoSide,
    },
    /// The repo's key or branch differs.
    Update {
        /// Repo alias.
        alias: String,
        /// Current state.
        before: RepoSide,
        /// Desired state.
        after: RepoSide,
    },
}

impl RepoChange {
    /// Kind tag of this change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Remove { .. } => ChangeKind::Remove,
            Self::Update { .. } => ChangeKind::Update,
        }
    }

    /// Alias of the repo this change applies to.
    pub fn alias(&self) -> &str {
        match self {
            Self::Add { alias, .. } | Self::Remove { alias, .. } | Self::Update { alias, .. } => {
                alias
            }
        }
    }
}

/// A change to one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceChange {
    /// The workspace must be created with all of its desired repos.
    Add {
        /// Workspace id.
        id: String,
    },
    /// The workspace must be removed with all of its repos.
    Remove {
        /// Workspace id.
        id: String,
    },
    /// Some repos inside the workspace differ.
    Update {
        /// Workspace id.
        id: String,
        /// Per-repo changes, sorted by alias.
        repos: Vec<RepoChange>,
    },
}

impl WorkspaceChange {
    /// Kind tag of this change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Remove { .. } => ChangeKind::Remove,
            Self::Update { .. } => ChangeKind::Update,
        }
    }

    /// Workspace id this change applies to.
    pub fn id(&self) -> &str {
        match self {
            Self::Add { id } | Self::Remove { id } | Self::Update { id, .. } => id,
        }
    }

    /// Nested repo changes; empty unless this is an `Update`.
    pub fn repo_changes(&self) -> &[RepoChange] {
        match self {
            Self::Update { repos, .. } => repos,
            Self::Add { .. } | Self::Remove { .. } => &[],
        }
    }
}

/// Compute the changes needed to turn `actual` into `desired`, sorted by id.
pub fn diff(desired: &Inventory, actual: &Inventory) -> Vec<WorkspaceChange> {
    let ids: BTreeSet<&str> = desired.ids().chain(actual.ids()).collect();

    let mut changes = Vec::new();
    for id in ids {
        match (desired.get(id), actual.get(id)) {
            (Some(_), None) => changes.push(WorkspaceChange::Add { id: id.to_string() }),
            (None, Some(_)) => changes.push(WorkspaceChange::Remove { id: id.to_string() }),
            (Some(want), Some(have)) => {
                let repos = diff_repos(want, have);
                if !repos.is_empty() {
                    changes.push(WorkspaceChange::Update {
                        id: id.to_string(),
                        repos,
                    });
                }
            }
            (None, None) => {}
        }
    }
    changes
}

/// Compare the repo sets of one workspace keyed by alias.
fn diff_repos(desired: &Workspace, actual: &Workspace) -> Vec<RepoChange> {
    let want: BTreeMap<&str, &Repo> = desired
        .repos
        .iter()
        .map(|repo| (repo.alias.as_str(), repo))
        .collect();
    let have: BTreeMap<&str, &Repo> = actual
        .repos
        .iter()
        .map(|repo| (repo.alias.as_str(), repo))
        .collect();
    let aliases: BTreeSet<&str> = want.keys().chain(have.keys()).copied().collect();

    let mut changes = Vec::new();
    for alias in aliases {
        match (want.get(alias), have.get(alias)) {
            (Some(after), None) => changes.push(RepoChange::Add {
                alias: alias.to_string(),
                after: RepoSide::from(*after),
            }),
            (None, Some(before)) => changes.push(RepoChange::Remove {
                alias: alias.to_string(),
                before: RepoSide::from(*before),
            }),
            (Some(after), Some(before)) if after != before => changes.push(RepoChange::Update {
                alias: alias.to_string(),
                before: RepoSide::from(*before),
                after: RepoSide::from(*after),
            }),
            _ => {}
        }
    }
    changes
}

/// Whether applying these changes could discard existing work.
///
/// Removing a workspace is destructive, and so is any repo removal or update
/// inside a workspace update: changing a repo's key or branch replaces its
/// working tree.
pub fn is_destructive(changes: &[WorkspaceChange]) -> bool {
    changes.iter().any(|change| match change {
        WorkspaceChange::Add { .. } => false,
        WorkspaceChange::Remove { .. } => true,
        WorkspaceChange::Update { repos, .. } => repos
            .iter()
            .any(|repo| matches!(repo.kind(), ChangeKind::Remove | ChangeKind::Update)),
    })
}

/// Totals of workspace-level changes by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    /// Workspaces added.
    pub add: usize,
    /// Workspaces updated.
    pub update: usize,
    /// Workspaces removed.
    pub remove: usize,
}

/// Tally workspace-level changes by kind.
pub fn count_changes(changes: &[WorkspaceChange]) -> ChangeCounts {
    let mut counts = ChangeCounts::default();
    for change in changes {
        match change.kind() {
            ChangeKind::Add => counts.add += 1,
            ChangeKind::Update => counts.update += 1,
            ChangeKind::Remove => counts.remove += 1,
        }
    }
    counts
}

/// Distinct repo keys that a plan will clone or check out, sorted.
///
/// A workspace `Add` contributes every repo it declares in `desired`; an
/// `Update` contributes the target key of each added or updated repo.
pub fn prefetch_repo_keys(changes: &[WorkspaceChange], desired: &Inventory) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for change in changes {
        match change {
            WorkspaceChange::Add { id } => {
                if let Some(workspace) = desired.get(id) {
                    keys.extend(workspace.repos.iter().map(|repo| repo.repo_key.clone()));
                }
            }
            WorkspaceChange::Update { repos, .. } => {
                for repo in repos {
                    if let RepoChange::Add { after, .. } | RepoChange::Update { after, .. } = repo {
                        keys.insert(after.repo_key.clone());
                    }
                }
            }
            WorkspaceChange::Remove { .. } => {}
        }
    }
    keys.into_iter().filter(|key| !key.is_empty()).collect()
}
