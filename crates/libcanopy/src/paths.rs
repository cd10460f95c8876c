//! On-disk layout of a managed root.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::repospec::RepoKey;

/// Directory holding bare stores.
pub const BARE_DIR: &str = "bare";
/// Directory holding workspaces.
pub const WS_DIR: &str = "ws";
/// Per-workspace directory reserved for tool metadata.
pub const META_DIR: &str = ".canopy";

/// `<root>/bare`
pub fn bare_root(root: &Path) -> PathBuf {
    root.join(BARE_DIR)
}

/// `<root>/ws`
pub fn ws_root(root: &Path) -> PathBuf {
    root.join(WS_DIR)
}

/// `<root>/bare/<host>/<owner>/<name>.git`
pub fn store_path(root: &Path, key: &RepoKey) -> PathBuf {
    bare_root(root)
        .join(key.host())
        .join(key.owner())
        .join(format!("{}.git", key.display_name()))
}

/// `<root>/ws/<id>`
pub fn workspace_dir(root: &Path, id: &str) -> PathBuf {
    ws_root(root).join(id)
}

/// `<root>/ws/<id>/<alias>`
pub fn worktree_dir(root: &Path, id: &str, alias: &str) -> PathBuf {
    workspace_dir(root, id).join(alias)
}

/// Whether `path` is an existing directory. Permission errors propagate.
pub fn dir_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Names of the workspace directories under `<root>/ws`, sorted.
///
/// Hidden entries and non-directories are skipped. A missing `ws` directory
/// yields an empty list.
pub fn workspace_ids(root: &Path) -> io::Result<Vec<String>> {
    let ws = ws_root(root);
    let entries = match fs::read_dir(&ws) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && !name.starts_with('.')
        {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}
