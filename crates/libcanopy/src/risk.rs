use std::fmt;

/// Raw observation of one working tree as reported by git.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoStatus {
    /// Checked-out branch; empty when detached or unknown.
    pub branch: String,
    /// Upstream tracking ref; empty when none is configured.
    pub upstream: String,
    /// Short hash of HEAD, when resolvable.
    pub head: String,
    /// Commits on the branch not on its upstream.
    pub ahead: u32,
    /// Commits on the upstream not on the branch.
    pub behind: u32,
    /// Entries with staged changes.
    pub staged: u32,
    /// Entries with unstaged changes.
    pub unstaged: u32,
    /// Untracked files.
    pub untracked: u32,
    /// Entries with merge conflicts.
    pub unmerged: u32,
    /// HEAD does not point at a branch.
    pub detached: bool,
    /// HEAD could not be resolved to a commit.
    pub head_missing: bool,
    /// Why the observation failed, if it did.
    pub error: Option<String>,
}

impl RepoStatus {
    /// A status carrying only an observation error.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Whether the working tree holds uncommitted work of any kind.
    pub fn is_dirty(&self) -> bool {
        self.staged > 0 || self.unstaged > 0 || self.untracked > 0 || self.unmerged > 0
    }
}

/// How unsafe it would be to discard a repo or workspace.
///
/// Variants are declared in ascending order of risk so that the derived
/// `Ord` gives `Clean < Unpushed < Diverged < Dirty < Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskKind {
    /// Nothing would be lost.
    #[default]
    Clean,
    /// Local commits are not on any known remote.
    Unpushed,
    /// Local and upstream both have commits the other lacks.
    Diverged,
    /// Uncommitted changes are present.
    Dirty,
    /// The state could not be determined.
    Unknown,
}

impl RiskKind {
    /// Lowercase label used in listings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Unpushed => "unpushed",
            Self::Diverged => "diverged",
            Self::Dirty => "dirty",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RiskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a single repo observation. First matching rule wins.
pub fn classify_repo_status(status: &RepoStatus) -> RiskKind {
    if status.error.is_some() || status.head_missing || (status.detached && status.upstream.is_empty())
    {
        return RiskKind::Unknown;
    }
    if status.is_dirty() {
        return RiskKind::Dirty;
    }
    if status.upstream.is_empty() {
        return RiskKind::Unpushed;
    }
    match (status.ahead > 0, status.behind > 0) {
        (true, true) => RiskKind::Diverged,
        (true, false) => RiskKind::Unpushed,
        _ => RiskKind::Clean,
    }
}

/// Aggregate repo risks to a workspace risk: the maximum, `Clean` when empty.
pub fn aggregate_workspace_risk<I>(kinds: I) -> RiskKind
where
    I: IntoIterator<Item = RiskKind>,
{
    kinds.into_iter().max().unwrap_or_default()
}

/// Whether removing something at this risk level needs explicit confirmation.
pub fn requires_remove_confirmation(kind: RiskKind) -> bool {
    kind != RiskKind::Clean
}

/// Classified state of one repo inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoState {
    /// Repo alias.
    pub alias: String,
    /// The observation the classification was derived from.
    pub status: RepoStatus,
    /// Derived risk.
    pub kind: RiskKind,
}

impl RepoState {
    /// Classify an observation for the given alias.
    pub fn new(alias: impl Into<String>, status: RepoStatus) -> Self {
        let kind = classify_repo_status(&status);
        Self {
            alias: alias.into(),
            status,
            kind,
        }
    }
}

/// Classified state of a whole workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceState {
    /// Workspace id.
    pub id: String,
    /// Aggregated risk.
    pub kind: RiskKind,
    /// Per-repo states, in scan order.
    pub repos: Vec<RepoState>,
}

impl WorkspaceState {
    /// Aggregate per-repo states into a workspace state.
    pub fn new(id: impl Into<String>, repos: Vec<RepoState>) -> Self {
        let kind = aggregate_workspace_risk(repos.iter().map(|repo| repo.kind));
        Self {
            id: id.into(),
            kind,
            repos,
        }
    }
}
