use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    error::{CanopyError, Result, Warning},
    git::Vcs,
    inventory::{Inventory, Workspace},
    manifest::{self, Manifest},
    output::Output,
    planner::{self, RepoChange, WorkspaceChange},
    snapshot,
};

/// Desired and actual inventories with the changes between them.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Manifest schema version, carried into the rebuilt manifest.
    pub version: u32,
    /// Inventory described by the manifest.
    pub desired: Inventory,
    /// Inventory found on disk.
    pub actual: Inventory,
    /// Changes turning actual into desired, sorted by workspace id.
    pub changes: Vec<WorkspaceChange>,
    /// Problems met while building the snapshot.
    pub warnings: Vec<Warning>,
}

impl Plan {
    /// Whether applying would change nothing.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether applying could discard existing work.
    pub fn is_destructive(&self) -> bool {
        planner::is_destructive(&self.changes)
    }

    /// Repo keys worth fetching before applying.
    pub fn prefetch_keys(&self) -> Vec<String> {
        planner::prefetch_repo_keys(&self.changes, &self.desired)
    }

    /// Write the changes, one section per workspace, then the totals.
    pub fn render(&self, out: &dyn Output) -> Result<()> {
        if self.is_empty() {
            out.message("no changes")?;
            return Ok(());
        }
        for change in &self.changes {
            match change {
                WorkspaceChange::Add { id } => {
                    let section = out.section(&format!("+ {id}"));
                    if let Some(ws) = self.desired.get(id) {
                        render_repos(section.as_ref(), '+', ws)?;
                    }
                }
                WorkspaceChange::Remove { id } => {
                    let section = out.section(&format!("- {id}"));
                    if let Some(ws) = self.actual.get(id) {
                        render_repos(section.as_ref(), '-', ws)?;
                    }
                }
                WorkspaceChange::Update { id, repos } => {
                    let section = out.section(&format!("~ {id}"));
                    for repo in repos {
                        section.message(&repo_line(repo))?;
                    }
                }
            }
        }
        let counts = planner::count_changes(&self.changes);
        out.message(&format!(
            "plan: add={} update={} remove={}",
            counts.add, counts.update, counts.remove
        ))?;
        if self.is_destructive() {
            out.warn("plan contains destructive changes")?;
        }
        Ok(())
    }
}

/// One line per repo of a workspace being added or removed.
fn render_repos(out: &dyn Output, sign: char, ws: &Workspace) -> Result<()> {
    for repo in &ws.repos {
        out.message(&format!("{sign} {} {} @ {}", repo.alias, repo.repo_key, repo.branch))?;
    }
    Ok(())
}

/// Render a nested repo change.
fn repo_line(change: &RepoChange) -> String {
    match change {
        RepoChange::Add { alias, after } => {
            format!("+ {alias} {} @ {}", after.repo_key, after.branch)
        }
        RepoChange::Remove { alias, before } => {
            format!("- {alias} {} @ {}", before.repo_key, before.branch)
        }
        RepoChange::Update {
            alias,
            before,
            after,
        } if before.repo_key == after.repo_key => {
            format!("~ {alias} {} -> {}", before.branch, after.branch)
        }
        RepoChange::Update {
            alias,
            before,
            after,
        } => format!(
            "~ {alias} {} @ {} -> {} @ {}",
            before.repo_key, before.branch, after.repo_key, after.branch
        ),
    }
}

/// Validate the manifest, snapshot the root and diff the two.
///
/// Validation issues abort before anything on disk is inspected.
pub fn plan(root: &Path, vcs: &dyn Vcs) -> Result<Plan> {
    let manifest = Manifest::load(root)?;
    let issues = manifest.validate();
    if !issues.is_empty() {
        return Err(CanopyError::Validation { issues });
    }
    let desired = manifest.to_inventory();
    let (actual, warnings) = snapshot::build_snapshot(root, vcs)?;
    let changes = planner::diff(&desired, &actual);
    info!(changes = changes.len(), "plan computed");
    Ok(Plan {
        version: manifest.version,
        desired,
        actual,
        changes,
        warnings,
    })
}

/// Result of writing the on-disk state as the manifest.
#[derive(Debug, Clone)]
pub struct Imported {
    /// Manifest file written.
    pub path: PathBuf,
    /// Manifest contents.
    pub manifest: Manifest,
    /// Problems met while scanning.
    pub warnings: Vec<Warning>,
}

/// Snapshot the root and write it as the manifest.
pub fn import(root: &Path, vcs: &dyn Vcs) -> Result<Imported> {
    let version = Manifest::load(root).map(|m| m.version).unwrap_or(manifest::VERSION);
    let (actual, warnings) = snapshot::build_snapshot(root, vcs)?;
    let manifest = Manifest::from_inventory(&actual, version);
    manifest.save(root)?;
    info!(workspaces = actual.len(), "manifest imported");
    Ok(Imported {
        path: manifest::path(root),
        manifest,
        warnings,
    })
}
