use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    cancel::CancelToken,
    error::{CanopyError, Result},
    risk::RepoStatus,
};

/// Refspec mirroring every remote branch head into `refs/remotes/origin/*`.
pub const MIRROR_REFSPEC: &str = "+refs/heads/*:refs/remotes/origin/*";

/// Symbolic ref pointing at the remote's default branch.
pub const ORIGIN_HEAD: &str = "refs/remotes/origin/HEAD";

/// How often a running git child is polled for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The remote's advertised HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    /// Default branch name, without `refs/heads/`.
    pub branch: String,
    /// Commit the branch points at, when advertised.
    pub hash: Option<String>,
}

/// How a new worktree gets its branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkout {
    /// Check out a local branch that already exists.
    Existing {
        /// Local branch name.
        branch: String,
    },
    /// Create a local branch tracking a remote-tracking ref.
    Track {
        /// Local branch name.
        branch: String,
        /// Remote-tracking ref, e.g. `origin/feature`.
        upstream: String,
    },
    /// Create a new local branch from a start point.
    Create {
        /// Local branch name.
        branch: String,
        /// Commit-ish the branch starts at.
        start_point: String,
    },
}

/// Version-control operations consumed by the core.
///
/// Every call is a fallible request against an external capability so the
/// reconciliation and apply logic can run against an in-memory fake.
pub trait Vcs: Send + Sync {
    /// Clone `remote_url` into a new bare repository at `store`.
    fn clone_bare(&self, remote_url: &str, store: &Path) -> Result<()>;
    /// Configure the store's fetch refspec to mirror all remote branch heads.
    fn configure_remote_fetch(&self, store: &Path) -> Result<()>;
    /// Fetch from origin, pruning deleted remote branches.
    fn fetch_prune(&self, store: &Path) -> Result<()>;
    /// Resolve a symbolic ref, `None` when it is not symbolic or absent.
    fn symbolic_ref(&self, repo: &Path, name: &str) -> Result<Option<String>>;
    /// Point a symbolic ref at `target`.
    fn set_symbolic_ref(&self, repo: &Path, name: &str, target: &str) -> Result<()>;
    /// Ask the remote which branch its HEAD points at.
    fn ls_remote_head(&self, store: &Path) -> Result<Option<RemoteHead>>;
    /// Resolve a ref to a hash, `None` when absent.
    fn show_ref(&self, repo: &Path, name: &str) -> Result<Option<String>>;
    /// Short names of every local branch.
    fn local_branches(&self, repo: &Path) -> Result<Vec<String>>;
    /// Delete a ref.
    fn delete_ref(&self, repo: &Path, name: &str) -> Result<()>;
    /// Branches checked out in any worktree linked to `store`.
    fn worktree_branches(&self, store: &Path) -> Result<Vec<String>>;
    /// Porcelain status of a working tree.
    fn status(&self, worktree: &Path) -> Result<RepoStatus>;
    /// The `origin` URL configured for a repository.
    fn remote_url(&self, repo: &Path) -> Result<String>;
    /// Add a linked worktree at `path`.
    fn add_worktree(&self, store: &Path, path: &Path, checkout: &Checkout) -> Result<()>;
    /// Force-remove the linked worktree at `path`. Missing worktrees are not an error.
    fn remove_worktree(&self, store: &Path, path: &Path) -> Result<()>;
}

/// Captured result of a git invocation.
#[derive(Debug)]
struct GitOutput {
    /// Exit code, `-1` when terminated by a signal.
    code: i32,
    /// Captured stdout.
    stdout: String,
    /// Captured stderr.
    stderr: String,
}

/// [`Vcs`] implementation that shells out to the `git` executable.
///
/// Children are polled rather than waited on, so firing the shared
/// [`CancelToken`] kills in-flight commands promptly.
#[derive(Debug, Clone)]
pub struct Git {
    /// Cancellation shared with the rest of the invocation.
    cancel: CancelToken,
    /// Echo every command at info level instead of debug.
    verbose: bool,
}

impl Git {
    /// Create a git runner bound to a cancellation token.
    pub fn new(cancel: CancelToken, verbose: bool) -> Self {
        Self { cancel, verbose }
    }

    /// Run git in `dir`, returning output regardless of exit status.
    fn exec(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        self.cancel.check()?;
        let command = format!("git {}", args.join(" "));
        if self.verbose {
            info!(target: "canopy::git", dir = %dir.display(), "$ {command}");
        } else {
            debug!(target: "canopy::git", dir = %dir.display(), "$ {command}");
        }

        let mut child = Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .spawn()
            .map_err(|e| CanopyError::Git(format!("Failed to execute git command: {command}: {e}")))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let code = self.wait(&mut child, &command)?;

        Ok(GitOutput {
            code,
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        })
    }

    /// Poll a child until it exits or the token fires.
    fn wait(&self, child: &mut Child, command: &str) -> Result<i32> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.code().unwrap_or(-1));
            }
            if self.cancel.is_cancelled() {
                debug!(target: "canopy::git", "cancelling: {command}");
                // The child may already have exited between the poll and the kill.
                if let Err(e) = child.kill() {
                    debug!(target: "canopy::git", "kill failed: {e}");
                }
                child.wait()?;
                return Err(CanopyError::Cancelled);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Run git in `dir` and fail with the full command on a non-zero exit.
    fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        let output = self.exec(dir, args)?;
        if output.code != 0 {
            return Err(CanopyError::Git(format!(
                "Git command failed: git {}\nError: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

/// Read a child pipe to completion on a helper thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            // A read error leaves whatever was captured so far.
            if pipe.read_to_end(&mut buf).is_err() {
                buf.shrink_to_fit();
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

/// Collect a drained pipe, treating a panicked reader as empty output.
fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Sibling directory a bare clone is written to before it is moved into
/// place, so an interrupted clone never looks like a store.
fn staging_path(store: &Path) -> PathBuf {
    let mut name = store.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    store.with_file_name(name)
}

/// Remove `dir` and its contents; a missing directory is fine.
fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Convert a path to `&str` for use as a git argument.
fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| CanopyError::Git(format!("Invalid path: {}", path.display())))
}

impl Vcs for Git {
    fn clone_bare(&self, remote_url: &str, store: &Path) -> Result<()> {
        let parent = store.parent().unwrap_or(Path::new("."));
        let staging = staging_path(store);
        remove_dir_if_present(&staging)?;
        let cloned = path_arg(&staging).and_then(|target| {
            self.run(parent, &["clone", "--bare", "--quiet", remote_url, target])
        });
        if let Err(e) = cloned {
            if let Err(cleanup) = remove_dir_if_present(&staging) {
                debug!("failed to remove {}: {cleanup}", staging.display());
            }
            return Err(e);
        }
        fs::rename(&staging, store)?;
        Ok(())
    }

    fn configure_remote_fetch(&self, store: &Path) -> Result<()> {
        self.run(store, &["config", "remote.origin.fetch", MIRROR_REFSPEC])?;
        Ok(())
    }

    fn fetch_prune(&self, store: &Path) -> Result<()> {
        self.run(store, &["fetch", "--prune", "--quiet", "origin"])?;
        Ok(())
    }

    fn symbolic_ref(&self, repo: &Path, name: &str) -> Result<Option<String>> {
        let output = self.exec(repo, &["symbolic-ref", "-q", name])?;
        match output.code {
            0 => Ok(Some(output.stdout.trim().to_string()).filter(|s| !s.is_empty())),
            1 => Ok(None),
            _ => Err(CanopyError::Git(format!(
                "Git command failed: git symbolic-ref -q {name}\nError: {}",
                output.stderr.trim()
            ))),
        }
    }

    fn set_symbolic_ref(&self, repo: &Path, name: &str, target: &str) -> Result<()> {
        self.run(repo, &["symbolic-ref", name, target])?;
        Ok(())
    }

    fn ls_remote_head(&self, store: &Path) -> Result<Option<RemoteHead>> {
        let output = self.run(store, &["ls-remote", "--symref", "origin", "HEAD"])?;
        Ok(parse_ls_remote_symref(&output.stdout))
    }

    fn show_ref(&self, repo: &Path, name: &str) -> Result<Option<String>> {
        let output = self.exec(repo, &["rev-parse", "--verify", "--quiet", name])?;
        match output.code {
            0 => Ok(Some(output.stdout.trim().to_string())),
            1 => Ok(None),
            _ => Err(CanopyError::Git(format!(
                "Git command failed: git rev-parse --verify --quiet {name}\nError: {}",
                output.stderr.trim()
            ))),
        }
    }

    fn local_branches(&self, repo: &Path) -> Result<Vec<String>> {
        let output = self.run(
            repo,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )?;
        Ok(output
            .stdout
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|branch| !branch.is_empty())
            .collect())
    }

    fn delete_ref(&self, repo: &Path, name: &str) -> Result<()> {
        self.run(repo, &["update-ref", "-d", name])?;
        Ok(())
    }

    fn worktree_branches(&self, store: &Path) -> Result<Vec<String>> {
        let output = self.run(store, &["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&output.stdout)
            .into_iter()
            .filter_map(|worktree| worktree.branch)
            .collect())
    }

    fn status(&self, worktree: &Path) -> Result<RepoStatus> {
        let output = self.run(worktree, &["status", "--porcelain=v2", "--branch"])?;
        Ok(parse_status_porcelain_v2(&output.stdout))
    }

    fn remote_url(&self, repo: &Path) -> Result<String> {
        let output = self.run(repo, &["config", "--get", "remote.origin.url"])?;
        Ok(output.stdout.trim().to_string())
    }

    fn add_worktree(&self, store: &Path, path: &Path, checkout: &Checkout) -> Result<()> {
        let path = path_arg(path)?;
        let args: Vec<&str> = match checkout {
            Checkout::Existing { branch } => vec!["worktree", "add", "--quiet", path, branch],
            Checkout::Track { branch, upstream } => vec![
                "worktree", "add", "--quiet", "--track", "-b", branch, path, upstream,
            ],
            Checkout::Create {
                branch,
                start_point,
            } => vec![
                "worktree",
                "add",
                "--quiet",
                "--no-track",
                "-b",
                branch,
                path,
                start_point,
            ],
        };
        self.run(store, &args)?;
        Ok(())
    }

    fn remove_worktree(&self, store: &Path, path: &Path) -> Result<()> {
        let output = self.run(store, &["worktree", "list", "--porcelain"])?;
        let registered = parse_worktree_list(&output.stdout)
            .iter()
            .any(|worktree| paths_match(&worktree.path, path));
        if registered {
            self.run(store, &["worktree", "remove", "--force", path_arg(path)?])?;
        }
        self.run(store, &["worktree", "prune"])?;
        Ok(())
    }
}

/// Best-effort path comparison that tolerates symlinked temp directories.
fn paths_match(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    /// Filesystem path of the worktree.
    pub path: PathBuf,
    /// Checked-out branch without `refs/heads/`, `None` when detached or bare.
    pub branch: Option<String>,
}

/// Parse `git worktree list --porcelain` output.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            worktrees.extend(current.take());
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ")
            && let Some(entry) = current.as_mut()
        {
            let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(short.to_string());
        }
    }
    worktrees.extend(current);
    worktrees
}

/// Parse `git ls-remote --symref origin HEAD` output.
pub fn parse_ls_remote_symref(output: &str) -> Option<RemoteHead> {
    let mut branch = None;
    let mut hash = None;
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some("ref:"), Some(target), Some("HEAD")) => {
                branch = target.strip_prefix("refs/heads/").map(str::to_string);
            }
            (Some(oid), Some("HEAD"), None) => hash = Some(oid.to_string()),
            _ => {}
        }
    }
    branch.map(|branch| RemoteHead { branch, hash })
}

/// Parse `git status --porcelain=v2 --branch` output.
pub fn parse_status_porcelain_v2(output: &str) -> RepoStatus {
    let mut status = RepoStatus::default();
    for line in output.lines() {
        if let Some(header) = line.strip_prefix("# ") {
            let mut fields = header.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("branch.oid"), Some("(initial)")) => status.head_missing = true,
                (Some("branch.oid"), Some(oid)) => status.head = oid.chars().take(7).collect(),
                (Some("branch.head"), Some("(detached)")) => status.detached = true,
                (Some("branch.head"), Some(head)) => status.branch = head.to_string(),
                (Some("branch.upstream"), Some(upstream)) => {
                    status.upstream = upstream.to_string();
                }
                (Some("branch.ab"), Some(ahead)) => {
                    status.ahead = ahead.trim_start_matches('+').parse().unwrap_or(0);
                    status.behind = fields
                        .next()
                        .map(|b| b.trim_start_matches('-').parse().unwrap_or(0))
                        .unwrap_or(0);
                }
                _ => {}
            }
            continue;
        }

        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("1" | "2") => {
                let xy = fields.next().unwrap_or("..").as_bytes();
                if xy.first().is_some_and(|&x| x != b'.') {
                    status.staged += 1;
                }
                if xy.get(1).is_some_and(|&y| y != b'.') {
                    status.unstaged += 1;
                }
            }
            Some("u") => status.unmerged += 1,
            Some("?") => status.untracked += 1,
            _ => {}
        }
    }
    status
}
