//! In-memory test doubles for the VCS and output collaborators.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use indicatif::ProgressBar;

use crate::{
    error::{CanopyError, Result},
    git::{Checkout, RemoteHead, Vcs},
    output::{self, Output, OutputError},
    risk::RepoStatus,
};

/// A remote as seen through `ls-remote` and `fetch`.
#[derive(Debug, Clone, Default)]
struct FakeRemote {
    /// Branch HEAD points at; empty for an empty repository.
    default_branch: String,
    /// Branch name to commit hash.
    branches: BTreeMap<String, String>,
}

/// A bare store created by `clone_bare`.
#[derive(Debug, Default)]
struct FakeStore {
    /// URL the store was cloned from.
    url: String,
    /// Full ref name to hash.
    refs: BTreeMap<String, String>,
    /// Symbolic ref name to target.
    symrefs: BTreeMap<String, String>,
    /// Whether the mirror refspec has been configured.
    refspec: bool,
    /// Linked worktree path to checked-out branch.
    worktrees: BTreeMap<PathBuf, String>,
}

/// Mutable state behind the fake.
#[derive(Debug, Default)]
struct State {
    /// Remotes keyed by URL.
    remotes: BTreeMap<String, FakeRemote>,
    /// Stores keyed by path.
    stores: BTreeMap<PathBuf, FakeStore>,
    /// Linked worktree path to owning store.
    worktrees: BTreeMap<PathBuf, PathBuf>,
    /// Log of every operation performed, as short command strings.
    calls: Vec<String>,
    /// Remote URLs whose network operations fail.
    offline: HashSet<String>,
    /// Worktrees whose status calls fail.
    status_errors: HashSet<PathBuf>,
    /// Scripted statuses by worktree.
    statuses: HashMap<PathBuf, RepoStatus>,
}

/// In-memory [`Vcs`] that mirrors directory creation on the real filesystem
/// so existence checks behave as they do against git.
#[derive(Debug, Default)]
pub struct FakeVcs {
    /// Shared state.
    state: Mutex<State>,
    /// Artificial latency for network operations.
    latency: Option<Duration>,
}

impl FakeVcs {
    /// An empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake whose network operations sleep for `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Lock the state, recovering from a poisoned lock.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a remote with the given default branch and branches.
    pub fn add_remote(&self, url: &str, default_branch: &str, branches: &[&str]) {
        let remote = FakeRemote {
            default_branch: default_branch.to_string(),
            branches: branches
                .iter()
                .enumerate()
                .map(|(i, b)| (b.to_string(), format!("{i:07}")))
                .collect(),
        };
        self.state().remotes.insert(url.to_string(), remote);
    }

    /// Add a branch to an existing remote.
    pub fn push_remote_branch(&self, url: &str, branch: &str) {
        if let Some(remote) = self.state().remotes.get_mut(url) {
            remote.branches.insert(branch.to_string(), "fffffff".to_string());
        }
    }

    /// Change which branch a remote's HEAD points at.
    pub fn set_remote_default(&self, url: &str, branch: &str) {
        if let Some(remote) = self.state().remotes.get_mut(url) {
            remote.default_branch = branch.to_string();
        }
    }

    /// Make every network operation against `url` fail.
    pub fn set_offline(&self, url: &str) {
        self.state().offline.insert(url.to_string());
    }

    /// Script the status reported for a worktree.
    pub fn set_status(&self, worktree: &Path, status: RepoStatus) {
        self.state().statuses.insert(worktree.to_path_buf(), status);
    }

    /// Make status calls for a worktree fail.
    pub fn fail_status(&self, worktree: &Path) {
        self.state().status_errors.insert(worktree.to_path_buf());
    }

    /// Create a local branch directly in a store.
    pub fn create_local_branch(&self, store: &Path, branch: &str) {
        if let Some(s) = self.state().stores.get_mut(store) {
            s.refs
                .insert(format!("refs/heads/{branch}"), "eeeeeee".to_string());
        }
    }

    /// Every recorded call.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Simulate network latency.
    fn network(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

/// Build a git error.
fn git_err(msg: impl Into<String>) -> CanopyError {
    CanopyError::Git(msg.into())
}

/// Look up a store or fail like git does outside a repository.
fn store_mut<'a>(state: &'a mut State, store: &Path) -> Result<&'a mut FakeStore> {
    state
        .stores
        .get_mut(store)
        .ok_or_else(|| git_err(format!("not a git repository: {}", store.display())))
}

/// Resolve a short or full ref name against a store.
fn resolve(store: &FakeStore, name: &str) -> Option<String> {
    [
        name.to_string(),
        format!("refs/heads/{name}"),
        format!("refs/remotes/{name}"),
    ]
    .iter()
    .find_map(|candidate| store.refs.get(candidate).cloned())
}

impl Vcs for FakeVcs {
    fn clone_bare(&self, remote_url: &str, store: &Path) -> Result<()> {
        self.network();
        let mut state = self.state();
        state.calls.push(format!("clone {remote_url}"));
        if state.offline.contains(remote_url) {
            return Err(git_err(format!("could not read from remote {remote_url}")));
        }
        let remote = state
            .remotes
            .get(remote_url)
            .cloned()
            .ok_or_else(|| git_err(format!("repository '{remote_url}' not found")))?;
        fs::create_dir_all(store)?;
        let mut fake = FakeStore {
            url: remote_url.to_string(),
            ..FakeStore::default()
        };
        for (branch, hash) in &remote.branches {
            fake.refs.insert(format!("refs/heads/{branch}"), hash.clone());
        }
        if !remote.default_branch.is_empty() {
            fake.symrefs.insert(
                "HEAD".to_string(),
                format!("refs/heads/{}", remote.default_branch),
            );
        }
        state.stores.insert(store.to_path_buf(), fake);
        Ok(())
    }

    fn configure_remote_fetch(&self, store: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push("config remote.origin.fetch".to_string());
        store_mut(&mut state, store)?.refspec = true;
        Ok(())
    }

    fn fetch_prune(&self, store: &Path) -> Result<()> {
        self.network();
        let mut state = self.state();
        state.calls.push("fetch --prune".to_string());
        let url = store_mut(&mut state, store)?.url.clone();
        if state.offline.contains(&url) {
            return Err(git_err(format!("could not read from remote {url}")));
        }
        let remote = state.remotes.get(&url).cloned().unwrap_or_default();
        let fake = store_mut(&mut state, store)?;
        if fake.refspec {
            fake.refs.retain(|name, _| !name.starts_with("refs/remotes/origin/"));
            for (branch, hash) in remote.branches {
                fake.refs
                    .insert(format!("refs/remotes/origin/{branch}"), hash);
            }
        }
        Ok(())
    }

    fn symbolic_ref(&self, repo: &Path, name: &str) -> Result<Option<String>> {
        let state = self.state();
        if let Some(store) = state.stores.get(repo) {
            return Ok(store.symrefs.get(name).cloned());
        }
        if name == "HEAD"
            && let Some(store) = state.worktrees.get(repo)
        {
            let branch = state
                .stores
                .get(store)
                .and_then(|s| s.worktrees.get(repo))
                .cloned()
                .unwrap_or_default();
            return Ok(Some(format!("refs/heads/{branch}")));
        }
        Err(git_err(format!("not a git repository: {}", repo.display())))
    }

    fn set_symbolic_ref(&self, repo: &Path, name: &str, target: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("symbolic-ref {name} {target}"));
        store_mut(&mut state, repo)?
            .symrefs
            .insert(name.to_string(), target.to_string());
        Ok(())
    }

    fn ls_remote_head(&self, store: &Path) -> Result<Option<RemoteHead>> {
        self.network();
        let mut state = self.state();
        state.calls.push("ls-remote".to_string());
        let url = store_mut(&mut state, store)?.url.clone();
        if state.offline.contains(&url) {
            return Err(git_err(format!("could not read from remote {url}")));
        }
        Ok(state.remotes.get(&url).and_then(|remote| {
            let hash = remote.branches.get(&remote.default_branch).cloned();
            (!remote.default_branch.is_empty()).then(|| RemoteHead {
                branch: remote.default_branch.clone(),
                hash,
            })
        }))
    }

    fn show_ref(&self, repo: &Path, name: &str) -> Result<Option<String>> {
        let mut state = self.state();
        Ok(resolve(store_mut(&mut state, repo)?, name))
    }

    fn local_branches(&self, repo: &Path) -> Result<Vec<String>> {
        let mut state = self.state();
        let store = store_mut(&mut state, repo)?;
        Ok(store
            .refs
            .keys()
            .filter_map(|name| name.strip_prefix("refs/heads/"))
            .map(str::to_string)
            .collect())
    }

    fn delete_ref(&self, repo: &Path, name: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("update-ref -d {name}"));
        store_mut(&mut state, repo)?.refs.remove(name);
        Ok(())
    }

    fn worktree_branches(&self, store: &Path) -> Result<Vec<String>> {
        let mut state = self.state();
        Ok(store_mut(&mut state, store)?
            .worktrees
            .values()
            .cloned()
            .collect())
    }

    fn status(&self, worktree: &Path) -> Result<RepoStatus> {
        let state = self.state();
        if state.status_errors.contains(worktree) {
            return Err(git_err("fatal: unable to read index"));
        }
        if let Some(status) = state.statuses.get(worktree) {
            return Ok(status.clone());
        }
        let store_path = state
            .worktrees
            .get(worktree)
            .ok_or_else(|| git_err(format!("not a git repository: {}", worktree.display())))?;
        let store = state
            .stores
            .get(store_path)
            .ok_or_else(|| git_err("dangling worktree"))?;
        let branch = store.worktrees.get(worktree).cloned().unwrap_or_default();
        let upstream = format!("refs/remotes/origin/{branch}");
        Ok(RepoStatus {
            upstream: if store.refs.contains_key(&upstream) {
                format!("origin/{branch}")
            } else {
                String::new()
            },
            branch,
            head: "abc1234".to_string(),
            ..RepoStatus::default()
        })
    }

    fn remote_url(&self, repo: &Path) -> Result<String> {
        let state = self.state();
        let store = state.worktrees.get(repo).map_or(repo, PathBuf::as_path);
        state
            .stores
            .get(store)
            .map(|s| s.url.clone())
            .ok_or_else(|| git_err(format!("not a git repository: {}", repo.display())))
    }

    fn add_worktree(&self, store: &Path, path: &Path, checkout: &Checkout) -> Result<()> {
        let mut state = self.state();
        let fake = store_mut(&mut state, store)?;
        let (call, branch) = match checkout {
            Checkout::Existing { branch } => {
                if !fake.refs.contains_key(&format!("refs/heads/{branch}")) {
                    return Err(git_err(format!("invalid reference: {branch}")));
                }
                (format!("worktree add {branch}"), branch)
            }
            Checkout::Track { branch, upstream } => {
                let hash = resolve(fake, upstream)
                    .ok_or_else(|| git_err(format!("invalid reference: {upstream}")))?;
                fake.refs.insert(format!("refs/heads/{branch}"), hash);
                (format!("worktree add --track -b {branch} {upstream}"), branch)
            }
            Checkout::Create {
                branch,
                start_point,
            } => {
                let hash = resolve(fake, start_point)
                    .ok_or_else(|| git_err(format!("invalid reference: {start_point}")))?;
                fake.refs.insert(format!("refs/heads/{branch}"), hash);
                (format!("worktree add -b {branch} {start_point}"), branch)
            }
        };
        if fake.worktrees.values().any(|b| b == branch) {
            return Err(git_err(format!("'{branch}' is already checked out")));
        }
        fake.worktrees.insert(path.to_path_buf(), branch.clone());
        fs::create_dir_all(path)?;
        fs::write(path.join(".git"), format!("gitdir: {}\n", store.display()))?;
        state.worktrees.insert(path.to_path_buf(), store.to_path_buf());
        state.calls.push(call);
        Ok(())
    }

    fn remove_worktree(&self, store: &Path, path: &Path) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("worktree remove {}", path.display()));
        store_mut(&mut state, store)?.worktrees.remove(path);
        state.worktrees.remove(path);
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}

/// Output double that records messages and answers prompts from a script.
#[derive(Debug, Default)]
pub struct Recorder {
    /// Recorded lines, prefixed with their level. Shared with nested sections.
    lines: Arc<Mutex<Vec<String>>>,
    /// Answer returned by `confirm`; `None` simulates Esc.
    answer: Option<bool>,
}

impl Recorder {
    /// A recorder that answers every prompt with `answer`.
    pub fn answering(answer: Option<bool>) -> Self {
        Self {
            lines: Arc::default(),
            answer,
        }
    }

    /// Recorded lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether any recorded line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    /// Record one line.
    fn push(&self, level: &str, msg: &str) -> output::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{level}: {msg}"));
        Ok(())
    }
}

impl Output for Recorder {
    fn message(&self, msg: &str) -> output::Result<()> {
        self.push("message", msg)
    }

    fn success(&self, msg: &str) -> output::Result<()> {
        self.push("success", msg)
    }

    fn warn(&self, msg: &str) -> output::Result<()> {
        self.push("warn", msg)
    }

    fn fail(&self, msg: &str) -> output::Result<()> {
        self.push("fail", msg)
    }

    fn confirm(&self, prompt: &str) -> output::Result<bool> {
        self.push("confirm", prompt)?;
        self.answer.ok_or(OutputError::Cancelled)
    }

    fn spinner(&self, _msg: &str) -> ProgressBar {
        ProgressBar::hidden()
    }

    fn finish(&self) -> output::Result<()> {
        Ok(())
    }

    fn section(&self, header: &str) -> Box<dyn Output> {
        let _ = self.push("section", header);
        Box::new(Self {
            lines: Arc::clone(&self.lines),
            answer: self.answer,
        })
    }
}
