//! Bare repository stores: one per repo key, shared by every worktree of
//! that repo.
//!
//! Normalization keeps a store's fetch refspec, remote HEAD and local
//! branches in a known shape. The remote's default branch is cached in
//! `refs/remotes/origin/HEAD`; the mtime of `FETCH_HEAD` records when the
//! remote was last consulted, and the cache is trusted for the configured
//! grace window.

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{CanopyError, Result, Warning},
    git::{ORIGIN_HEAD, Vcs},
    paths::{self, bare_root},
    repospec::{LOCAL_HOST, RepoKey, is_url},
};

/// Grace-window sentinel inside a store.
const FETCH_HEAD: &str = "FETCH_HEAD";

/// Prefix of remote-tracking refs.
const ORIGIN_PREFIX: &str = "refs/remotes/origin/";

/// A normalized store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    /// Key the store holds.
    pub repo_key: RepoKey,
    /// Path of the bare repository.
    pub path: PathBuf,
    /// Default branch of the remote, empty when the remote has none.
    pub default_branch: String,
}

/// A store found on disk by [`list_stores`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Canonical key derived from the store's path.
    pub repo_key: String,
    /// Path of the bare repository.
    pub path: PathBuf,
}

/// Reconciles bare stores under a root.
pub struct RepoStores<'a> {
    /// Invocation settings.
    config: &'a Config,
    /// VCS collaborator.
    vcs: &'a dyn Vcs,
}

impl<'a> RepoStores<'a> {
    /// Create a reconciler over `config.root`.
    pub fn new(config: &'a Config, vcs: &'a dyn Vcs) -> Self {
        Self { config, vcs }
    }

    /// Path of the store for `key`.
    pub fn path(&self, key: &RepoKey) -> PathBuf {
        paths::store_path(&self.config.root, key)
    }

    /// Whether the store for `key` exists.
    pub fn exists(&self, key: &RepoKey) -> Result<bool> {
        Ok(paths::dir_exists(&self.path(key))?)
    }

    /// Ensure the store named by a user-supplied spec exists, cloning it if
    /// needed. URLs are cloned verbatim; keys and shorthands are cloned with
    /// the configured protocol.
    pub fn ensure(&self, spec: &str) -> Result<Store> {
        let key = RepoKey::parse_with_host(spec, &self.config.default_host)?;
        let url = if is_url(spec) {
            spec.trim().to_string()
        } else {
            self.clone_url(&key)?
        };
        self.ensure_with_url(key, &url, false)
    }

    /// Ensure the store for a manifest key exists, cloning it if needed.
    pub fn ensure_key(&self, key: &RepoKey, fetch: bool) -> Result<Store> {
        if self.exists(key)? {
            return self.open(key, fetch);
        }
        let url = self.clone_url(key)?;
        self.ensure_with_url(key.clone(), &url, fetch)
    }

    /// Open a store that must already exist.
    pub fn open(&self, key: &RepoKey, fetch: bool) -> Result<Store> {
        let path = self.path(key);
        if !paths::dir_exists(&path)? {
            return Err(CanopyError::StoreNotFound {
                repo_key: key.to_string(),
            });
        }
        let default_branch = self.normalize(&path, fetch)?;
        Ok(Store {
            repo_key: key.clone(),
            path,
            default_branch,
        })
    }

    /// Warm a store ahead of an apply: resolve the default branch and fetch,
    /// without pruning branches. A missing store is cloned.
    pub fn prefetch(&self, key: &RepoKey) -> Result<()> {
        let path = self.path(key);
        if !paths::dir_exists(&path)? {
            let url = self.clone_url(key)?;
            self.clone_into(&url, &path)?;
        }
        self.ensure_default_branch(&path, true)?;
        Ok(())
    }

    /// Clone when missing, then normalize. A fresh clone is always fetched so
    /// its remote-tracking refs exist.
    fn ensure_with_url(&self, key: RepoKey, url: &str, fetch: bool) -> Result<Store> {
        let path = self.path(&key);
        let cloned = if paths::dir_exists(&path)? {
            false
        } else {
            self.clone_into(url, &path)?;
            true
        };
        let default_branch = self.normalize(&path, fetch || cloned)?;
        Ok(Store {
            repo_key: key,
            path,
            default_branch,
        })
    }

    /// URL used to clone a key that is not on disk yet.
    fn clone_url(&self, key: &RepoKey) -> Result<String> {
        if key.host() == LOCAL_HOST {
            return Err(CanopyError::StoreNotFound {
                repo_key: key.to_string(),
            });
        }
        Ok(key.remote_url(self.config.protocol))
    }

    /// Bare-clone `url` into `path`, creating parent directories.
    fn clone_into(&self, url: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        info!(store = %path.display(), "cloning {url}");
        self.vcs.clone_bare(url, path)
    }

    /// Full normalization: default branch, then branch pruning.
    fn normalize(&self, path: &Path, fetch: bool) -> Result<String> {
        let default_branch = self.ensure_default_branch(path, fetch)?;
        self.prune_local_heads(path, &default_branch)?;
        Ok(default_branch)
    }

    /// Configure the refspec, resolve the default branch (from cache inside
    /// the grace window, otherwise from the remote) and point `origin/HEAD`
    /// at it. Fetches when asked.
    fn ensure_default_branch(&self, path: &Path, fetch: bool) -> Result<String> {
        self.vcs.configure_remote_fetch(path)?;
        let mut default_branch = self.local_default_branch(path)?;

        let mut remote_checked = false;
        if default_branch.is_empty() || !recently_fetched(path, self.config) {
            debug!(store = %path.display(), "querying remote HEAD");
            default_branch = self
                .vcs
                .ls_remote_head(path)?
                .map(|head| head.branch)
                .unwrap_or_default();
            remote_checked = true;
        }

        if !default_branch.is_empty() {
            let target = format!("{ORIGIN_PREFIX}{default_branch}");
            if let Err(e) = self.vcs.set_symbolic_ref(path, ORIGIN_HEAD, &target) {
                warn!(store = %path.display(), "failed to set {ORIGIN_HEAD}: {e}");
            }
        }

        if fetch {
            if self.config.verbose {
                info!(store = %path.display(), "git fetch --prune");
            }
            self.vcs.fetch_prune(path)?;
        }
        if fetch || remote_checked {
            touch_fetch_head(path)?;
        }
        Ok(default_branch)
    }

    /// Default branch cached in `origin/HEAD`, empty when unset.
    fn local_default_branch(&self, path: &Path) -> Result<String> {
        Ok(self
            .vcs
            .symbolic_ref(path, ORIGIN_HEAD)?
            .and_then(|target| target.strip_prefix(ORIGIN_PREFIX).map(str::to_string))
            .unwrap_or_default())
    }

    /// Delete local branches that are neither the default branch nor checked
    /// out in a linked worktree.
    fn prune_local_heads(&self, path: &Path, keep: &str) -> Result<()> {
        let in_use = self.vcs.worktree_branches(path).unwrap_or_else(|e| {
            warn!(store = %path.display(), "cannot list worktrees: {e}");
            Vec::new()
        });
        for branch in self.vcs.local_branches(path)? {
            if branch == keep || in_use.contains(&branch) {
                continue;
            }
            debug!(store = %path.display(), "pruning local branch {branch}");
            if let Err(e) = self.vcs.delete_ref(path, &format!("refs/heads/{branch}")) {
                warn!(store = %path.display(), "failed to prune {branch}: {e}");
            }
        }
        Ok(())
    }
}

/// Whether the store consulted its remote within the grace window.
fn recently_fetched(path: &Path, config: &Config) -> bool {
    if config.fetch_grace.is_zero() {
        return false;
    }
    fs::metadata(path.join(FETCH_HEAD))
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < config.fetch_grace)
}

/// Bump the sentinel's mtime, creating it if needed.
fn touch_fetch_head(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.join(FETCH_HEAD))?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}

/// Enumerate `bare/<host>/<owner>/<name>.git` stores, sorted by key.
pub fn list_stores(root: &Path) -> Result<(Vec<StoreEntry>, Vec<Warning>)> {
    let bare = bare_root(root);
    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    for host in read_dirs(&bare)? {
        for owner in read_dirs(&host)? {
            for repo in read_dirs(&owner)? {
                let relative = repo.strip_prefix(&bare).unwrap_or(&repo);
                let is_store = repo
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(".git"));
                let key = relative
                    .to_str()
                    .filter(|_| is_store)
                    .and_then(|rel| RepoKey::parse(rel).ok());
                match key {
                    Some(key) => entries.push(StoreEntry {
                        repo_key: key.to_string(),
                        path: repo,
                    }),
                    None => warnings.push(Warning::new(
                        "repo store",
                        format!("unexpected entry {}", repo.display()),
                    )),
                }
            }
        }
    }
    entries.sort_by(|a, b| a.repo_key.cmp(&b.repo_key));
    Ok((entries, warnings))
}

/// Sorted subdirectories of `dir`; empty when `dir` is missing.
fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dirs = Vec::new();
    for entry in read {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
