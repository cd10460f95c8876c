//! Builds the actual inventory from the workspaces on disk.
//!
//! Scanning collects raw [`WorkspaceObservation`]s; [`build_inventory`] then
//! normalizes them without touching the filesystem, so partial failures
//! degrade to warnings for the affected workspace only.

use std::{
    fs,
    path::{Path, PathBuf},
    result::Result as StdResult,
};

use tracing::debug;

use crate::{
    error::{Result, Warning},
    git::Vcs,
    inventory::{Inventory, Repo, Workspace},
    metadata::{WorkspaceMetadata, WorkspaceMetadataStore},
    paths::{self, META_DIR},
    repospec::RepoKey,
    risk::{RepoState, RepoStatus, WorkspaceState},
};

/// Raw observation of one repo directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoObservation {
    /// Directory name.
    pub alias: String,
    /// Repo key derived from the worktree's origin.
    pub repo_key: String,
    /// Checked-out branch; empty when detached.
    pub branch: String,
    /// Recorded base ref, if any.
    pub base_ref: String,
}

/// Raw observation of one workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspaceObservation {
    /// Directory name.
    pub id: String,
    /// Metadata file contents, or why it could not be read.
    pub metadata: StdResult<Option<WorkspaceMetadata>, String>,
    /// Repos found, or why the workspace could not be scanned.
    pub repos: StdResult<Vec<RepoObservation>, String>,
}

/// Normalize observations into an inventory.
///
/// Fields are trimmed and ids de-duplicated and processed in sorted order.
/// Unreadable metadata yields a workspace with empty metadata plus a warning;
/// an unscannable workspace is left out with a warning.
pub fn build_inventory(observations: Vec<WorkspaceObservation>) -> (Inventory, Vec<Warning>) {
    let mut observations = observations;
    for obs in &mut observations {
        obs.id = obs.id.trim().to_string();
    }
    observations.sort_by(|a, b| a.id.cmp(&b.id));
    observations.dedup_by(|a, b| a.id == b.id);

    let mut inventory = Inventory::new();
    let mut warnings = Vec::new();
    for obs in observations {
        if obs.id.is_empty() {
            continue;
        }
        let repos = match obs.repos {
            Ok(repos) => repos,
            Err(e) => {
                warnings.push(Warning::new(format!("workspace {}", obs.id), format!("repos: {e}")));
                continue;
            }
        };
        let metadata = match obs.metadata {
            Ok(metadata) => metadata.unwrap_or_default(),
            Err(e) => {
                warnings.push(Warning::new(
                    format!("workspace {}", obs.id),
                    format!("metadata: {e}"),
                ));
                WorkspaceMetadata::default()
            }
        };
        let repos = repos
            .into_iter()
            .map(|repo| {
                let alias = repo.alias.trim().to_string();
                let base_ref = match repo.base_ref.trim() {
                    "" => metadata.base_refs.get(&alias).cloned().unwrap_or_default(),
                    base_ref => base_ref.to_string(),
                };
                Repo {
                    repo_key: repo.repo_key.trim().to_string(),
                    branch: repo.branch.trim().to_string(),
                    base_ref: base_ref.trim().to_string(),
                    alias,
                }
            })
            .collect();
        inventory.insert(Workspace {
            id: obs.id,
            description: metadata.description.trim().to_string(),
            mode: metadata.mode.trim().to_string(),
            preset_name: metadata.preset_name.trim().to_string(),
            source_url: metadata.source_url.trim().to_string(),
            base_branch: metadata.base_branch.trim().to_string(),
            repos,
        });
    }
    (inventory, warnings)
}

/// Scan every workspace under `root` and build the actual inventory.
pub fn build_snapshot(root: &Path, vcs: &dyn Vcs) -> Result<(Inventory, Vec<Warning>)> {
    let mut observations = Vec::new();
    let mut warnings = Vec::new();
    for id in paths::workspace_ids(root)? {
        let dir = paths::workspace_dir(root, &id);
        let metadata = WorkspaceMetadataStore::new(&dir)
            .read()
            .map_err(|e| e.to_string());
        let repos = match scan_workspace_repos(vcs, &dir) {
            Ok((repos, repo_warnings)) => {
                warnings.extend(repo_warnings.into_iter().map(|w| Warning {
                    scope: format!("workspace {id}"),
                    message: w.to_string(),
                }));
                Ok(repos)
            }
            Err(e) => Err(e.to_string()),
        };
        observations.push(WorkspaceObservation { id, metadata, repos });
    }
    let (inventory, build_warnings) = build_inventory(observations);
    warnings.extend(build_warnings);
    debug!(workspaces = inventory.len(), warnings = warnings.len(), "snapshot built");
    Ok((inventory, warnings))
}

/// Repo directories of a workspace: children holding a `.git` entry, sorted.
fn repo_dirs(ws_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(ws_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name == META_DIR || !entry.path().join(".git").exists() {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort();
    Ok(dirs)
}

/// Inspect the repos of one workspace directory.
///
/// A repo whose origin or HEAD cannot be read is skipped with a warning.
pub fn scan_workspace_repos(
    vcs: &dyn Vcs,
    ws_dir: &Path,
) -> Result<(Vec<RepoObservation>, Vec<Warning>)> {
    let mut repos = Vec::new();
    let mut warnings = Vec::new();
    for (alias, path) in repo_dirs(ws_dir)? {
        let observed = vcs.remote_url(&path).and_then(|url| {
            let key = RepoKey::parse(&url)?;
            let head = vcs.symbolic_ref(&path, "HEAD")?;
            Ok((key, head))
        });
        match observed {
            Ok((key, head)) => repos.push(RepoObservation {
                repo_key: key.to_string(),
                branch: head
                    .as_deref()
                    .and_then(|head| head.strip_prefix("refs/heads/"))
                    .unwrap_or_default()
                    .to_string(),
                base_ref: String::new(),
                alias,
            }),
            Err(e) => warnings.push(Warning::new(format!("repo {alias}"), e)),
        }
    }
    Ok((repos, warnings))
}

/// Classify every repo of a workspace. Status failures become `Unknown`.
pub fn workspace_state(root: &Path, vcs: &dyn Vcs, id: &str) -> Result<WorkspaceState> {
    let dir = paths::workspace_dir(root, id);
    let repos = repo_dirs(&dir)?
        .into_iter()
        .map(|(alias, path)| {
            let status = vcs
                .status(&path)
                .unwrap_or_else(RepoStatus::failed);
            RepoState::new(alias, status)
        })
        .collect();
    Ok(WorkspaceState::new(id, repos))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        git::Checkout,
        risk::RiskKind,
        testing::FakeVcs,
    };

    /// Observation with one repo and no metadata.
    fn obs(id: &str, branch: &str) -> WorkspaceObservation {
        WorkspaceObservation {
            id: id.to_string(),
            metadata: Ok(None),
            repos: Ok(vec![RepoObservation {
                alias: " app ".to_string(),
                repo_key: "github.com/acme/app.git\n".to_string(),
                branch: branch.to_string(),
                base_ref: String::new(),
            }]),
        }
    }

    #[test]
    fn build_inventory_trims_and_sorts() {
        let (inventory, warnings) = build_inventory(vec![obs(" W2", "dev "), obs("W1", "main")]);
        assert!(warnings.is_empty());
        assert_eq!(inventory.ids().collect::<Vec<_>>(), vec!["W1", "W2"]);
        let repo = &inventory.get("W2").unwrap().repos[0];
        assert_eq!(repo.alias, "app");
        assert_eq!(repo.repo_key, "github.com/acme/app.git");
        assert_eq!(repo.branch, "dev");
    }

    #[test]
    fn duplicate_ids_collapse() {
        let (inventory, _) = build_inventory(vec![obs("W1", "main"), obs("W1 ", "dev")]);
        assert_eq!(inventory.len(), 1);
    }

    #[test]
    fn unreadable_metadata_keeps_workspace() {
        let mut bad = obs("W1", "main");
        bad.metadata = Err("parse error".to_string());
        let (inventory, warnings) = build_inventory(vec![bad]);
        let ws = inventory.get("W1").unwrap();
        assert!(ws.description.is_empty());
        assert_eq!(ws.repos.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].to_string(), "workspace W1: metadata: parse error");
    }

    #[test]
    fn unscannable_workspace_is_absent() {
        let mut bad = obs("W1", "main");
        bad.repos = Err("permission denied".to_string());
        let (inventory, warnings) = build_inventory(vec![bad, obs("W2", "main")]);
        assert!(!inventory.contains("W1"));
        assert!(inventory.contains("W2"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn metadata_supplies_fields_and_base_refs() {
        let mut with_meta = obs("W1", "main");
        let mut metadata = WorkspaceMetadata {
            description: "  review 7 ".to_string(),
            mode: "review".to_string(),
            ..WorkspaceMetadata::default()
        };
        metadata
            .base_refs
            .insert("app".to_string(), "origin/main".to_string());
        with_meta.metadata = Ok(Some(metadata));
        let (inventory, _) = build_inventory(vec![with_meta]);
        let ws = inventory.get("W1").unwrap();
        assert_eq!(ws.description, "review 7");
        assert_eq!(ws.repos[0].base_ref, "origin/main");
    }

    /// Root with a bare store and a single-repo workspace `W1` on `main`.
    fn fake_root() -> (TempDir, FakeVcs, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let vcs = FakeVcs::new();
        let url = "https://github.com/acme/app.git";
        vcs.add_remote(url, "main", &["main"]);
        let store = tmp.path().join("bare/github.com/acme/app.git");
        vcs.clone_bare(url, &store).unwrap();
        vcs.configure_remote_fetch(&store).unwrap();
        vcs.fetch_prune(&store).unwrap();
        let worktree = tmp.path().join("ws/W1/app");
        vcs.add_worktree(
            &store,
            &worktree,
            &Checkout::Existing {
                branch: "main".to_string(),
            },
        )
        .unwrap();
        (tmp, vcs, worktree)
    }

    #[test]
    fn snapshot_reads_workspaces_from_disk() {
        let (tmp, vcs, _) = fake_root();
        // Not a repo: no .git entry.
        fs::create_dir_all(tmp.path().join("ws/W1/notes")).unwrap();
        fs::create_dir_all(tmp.path().join("ws/W2")).unwrap();
        WorkspaceMetadataStore::new(&tmp.path().join("ws/W1"))
            .write(&WorkspaceMetadata {
                mode: "manual".to_string(),
                ..WorkspaceMetadata::default()
            })
            .unwrap();

        let (inventory, warnings) = build_snapshot(tmp.path(), &vcs).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        let w1 = inventory.get("W1").unwrap();
        assert_eq!(w1.mode, "manual");
        assert_eq!(
            w1.repos,
            vec![Repo::new("app", "github.com/acme/app.git", "main")]
        );
        assert!(inventory.get("W2").unwrap().repos.is_empty());
    }

    #[test]
    fn snapshot_warns_on_foreign_repo() {
        let (tmp, vcs, _) = fake_root();
        let stray = tmp.path().join("ws/W1/stray");
        fs::create_dir_all(stray.join(".git")).unwrap();
        let (inventory, warnings) = build_snapshot(tmp.path(), &vcs).unwrap();
        assert_eq!(inventory.get("W1").unwrap().repos.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].scope.contains("W1"));
    }

    #[test]
    fn snapshot_of_empty_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let (inventory, warnings) = build_snapshot(tmp.path(), &FakeVcs::new()).unwrap();
        assert!(inventory.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn workspace_state_degrades_failed_status_to_unknown() {
        let (tmp, vcs, worktree) = fake_root();
        let state = workspace_state(tmp.path(), &vcs, "W1").unwrap();
        assert_eq!(state.kind, RiskKind::Clean);

        vcs.fail_status(&worktree);
        let state = workspace_state(tmp.path(), &vcs, "W1").unwrap();
        assert_eq!(state.kind, RiskKind::Unknown);
        assert!(state.repos[0].status.error.is_some());
    }
}
