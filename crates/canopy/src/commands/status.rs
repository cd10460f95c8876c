use anyhow::Result;
use libcanopy::{
    CanopyError, Config, Output, Vcs, paths,
    risk::{RepoState, RiskKind},
    snapshot,
};

use crate::ui::emit;

/// Run the `canopy status` command logic.
pub fn status(config: &Config, vcs: &dyn Vcs, output: &dyn Output, id: &str) -> Result<()> {
    if !paths::dir_exists(&paths::workspace_dir(&config.root, id))? {
        return Err(CanopyError::Workspace {
            id: id.to_string(),
            message: "no such workspace on disk".to_string(),
        }
        .into());
    }
    let state = snapshot::workspace_state(&config.root, vcs, id)?;
    let section = output.section(&format!("{} ({})", state.id, state.kind));
    if state.repos.is_empty() {
        emit(section.message("no repos"))?;
    }
    for repo in &state.repos {
        let line = repo_line(repo);
        match repo.kind {
            RiskKind::Clean => emit(section.success(&line))?,
            RiskKind::Unknown => emit(section.fail(&line))?,
            _ => emit(section.warn(&line))?,
        }
    }
    Ok(())
}

/// Alias, branch, risk and the counts behind it.
fn repo_line(repo: &RepoState) -> String {
    let status = &repo.status;
    if let Some(error) = &status.error {
        return format!("{}: {} ({error})", repo.alias, repo.kind);
    }
    let branch = if status.detached {
        "(detached HEAD)"
    } else {
        status.branch.as_str()
    };
    let mut details = Vec::new();
    for (count, label) in [
        (status.ahead, "ahead"),
        (status.behind, "behind"),
        (status.staged, "staged"),
        (status.unstaged, "unstaged"),
        (status.untracked, "untracked"),
        (status.unmerged, "unmerged"),
    ] {
        if count > 0 {
            details.push(format!("{count} {label}"));
        }
    }
    if status.upstream.is_empty() && !status.detached {
        details.push("no upstream".to_string());
    }
    if details.is_empty() {
        format!("{} @ {branch}: {}", repo.alias, repo.kind)
    } else {
        format!("{} @ {branch}: {} ({})", repo.alias, repo.kind, details.join(", "))
    }
}
