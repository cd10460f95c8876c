//! Labels each manifest entry against the filesystem: applied, missing,
//! drifted, or extra on disk.

use std::{collections::BTreeSet, fmt, path::Path};

use tracing::warn;

use crate::{
    error::{Result, Warning},
    git::Vcs,
    paths,
    plan,
    planner::WorkspaceChange,
    risk::RiskKind,
    snapshot,
};

/// How one workspace relates to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriftStatus {
    /// On disk and matching the manifest.
    Applied,
    /// In the manifest, not on disk.
    Missing,
    /// In the manifest and on disk, but different.
    Drift,
    /// On disk, not in the manifest.
    Extra,
}

impl DriftStatus {
    /// Lowercase label used in listings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Missing => "missing",
            Self::Drift => "drift",
            Self::Extra => "extra",
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labelled workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEntry {
    /// Workspace id.
    pub id: String,
    /// Drift label.
    pub status: DriftStatus,
    /// Aggregated risk, when the workspace exists on disk and was classified.
    pub risk: Option<RiskKind>,
}

/// Totals per label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftCounts {
    /// Applied entries.
    pub applied: usize,
    /// Missing entries.
    pub missing: usize,
    /// Drifted entries.
    pub drift: usize,
    /// Extra directories.
    pub extra: usize,
}

impl DriftCounts {
    /// Count one label.
    fn tally(&mut self, status: DriftStatus) {
        match status {
            DriftStatus::Applied => self.applied += 1,
            DriftStatus::Missing => self.missing += 1,
            DriftStatus::Drift => self.drift += 1,
            DriftStatus::Extra => self.extra += 1,
        }
    }
}

/// Manifest-anchored entries, extra directories and totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftView {
    /// One entry per manifest workspace, sorted by id.
    pub manifest_entries: Vec<DriftEntry>,
    /// Workspaces on disk but absent from the manifest, sorted by id.
    pub extra_entries: Vec<DriftEntry>,
    /// Totals.
    pub counts: DriftCounts,
}

/// Label desired ids against planner output and filesystem presence.
pub fn build_drift_view<'a, D, F>(
    desired_ids: D,
    changes: &[WorkspaceChange],
    filesystem_ids: F,
) -> DriftView
where
    D: IntoIterator<Item = &'a str>,
    F: IntoIterator<Item = &'a str>,
{
    let desired: BTreeSet<&str> = desired_ids.into_iter().collect();
    let on_disk: BTreeSet<&str> = filesystem_ids.into_iter().collect();
    let changed: BTreeSet<&str> = changes.iter().map(WorkspaceChange::id).collect();

    let mut view = DriftView::default();
    for id in &desired {
        let status = if !on_disk.contains(id) {
            DriftStatus::Missing
        } else if changed.contains(id) {
            DriftStatus::Drift
        } else {
            DriftStatus::Applied
        };
        view.counts.tally(status);
        view.manifest_entries.push(DriftEntry {
            id: id.to_string(),
            status,
            risk: None,
        });
    }
    for id in on_disk.difference(&desired) {
        view.counts.tally(DriftStatus::Extra);
        view.extra_entries.push(DriftEntry {
            id: id.to_string(),
            status: DriftStatus::Extra,
            risk: None,
        });
    }
    view
}

/// A drift view with risk for every workspace found on disk.
#[derive(Debug, Clone)]
pub struct ManifestListing {
    /// One entry per manifest workspace, sorted by id.
    pub manifest_entries: Vec<DriftEntry>,
    /// Workspaces on disk but absent from the manifest, sorted by id.
    pub extra_entries: Vec<DriftEntry>,
    /// Totals.
    pub counts: DriftCounts,
    /// Snapshot and classification problems.
    pub warnings: Vec<Warning>,
}

/// Plan the root and label every workspace, classifying risk best-effort.
pub fn list(root: &Path, vcs: &dyn Vcs) -> Result<ManifestListing> {
    let plan = plan::plan(root, vcs)?;
    let on_disk = paths::workspace_ids(root)?;
    let mut view = build_drift_view(
        plan.desired.ids(),
        &plan.changes,
        on_disk.iter().map(String::as_str),
    );
    let mut warnings = plan.warnings;

    let entries = view
        .manifest_entries
        .iter_mut()
        .chain(view.extra_entries.iter_mut())
        .filter(|entry| entry.status != DriftStatus::Missing);
    for entry in entries {
        entry.risk = Some(match snapshot::workspace_state(root, vcs, &entry.id) {
            Ok(state) => state.kind,
            Err(e) => {
                warn!("cannot classify workspace {}: {e}", entry.id);
                warnings.push(Warning::new(
                    format!("workspace {}", entry.id),
                    format!("risk: {e}"),
                ));
                RiskKind::Unknown
            }
        });
    }
    Ok(ManifestListing {
        manifest_entries: view.manifest_entries,
        extra_entries: view.extra_entries,
        counts: view.counts,
        warnings,
    })
}
