use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CanopyError, Result},
    inventory::Workspace,
    paths::META_DIR,
};

/// Metadata persisted inside a workspace directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceMetadata {
    /// Free-form description.
    pub description: String,
    /// Creation strategy tag.
    pub mode: String,
    /// Preset the workspace was created from.
    pub preset_name: String,
    /// Review or issue URL.
    pub source_url: String,
    /// Branch the workspace's repos were based on.
    pub base_branch: String,
    /// Unix timestamp (seconds) when the workspace was created.
    pub created_at: u64,
    /// Base ref per repo alias.
    pub base_refs: BTreeMap<String, String>,
}

impl WorkspaceMetadata {
    /// Capture the metadata fields of a workspace, stamped with the current time.
    pub fn from_workspace(workspace: &Workspace) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            description: workspace.description.clone(),
            mode: workspace.mode.clone(),
            preset_name: workspace.preset_name.clone(),
            source_url: workspace.source_url.clone(),
            base_branch: workspace.base_branch.clone(),
            created_at,
            base_refs: workspace
                .repos
                .iter()
                .filter(|repo| !repo.base_ref.is_empty())
                .map(|repo| (repo.alias.clone(), repo.base_ref.clone()))
                .collect(),
        }
    }
}

/// Store for reading and writing a workspace's metadata file.
pub struct WorkspaceMetadataStore {
    /// `<workspace>/.canopy`
    pub(crate) base_dir: PathBuf,
}

impl WorkspaceMetadataStore {
    /// Metadata file name inside [`META_DIR`].
    pub const FILE_NAME: &'static str = "metadata.toml";

    /// Create a metadata store for the given workspace directory.
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            base_dir: workspace_dir.join(META_DIR),
        }
    }

    /// Read metadata, returning `None` when no metadata exists.
    pub fn read(&self) -> Result<Option<WorkspaceMetadata>> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| {
            CanopyError::Metadata(format!("Failed to read metadata file {}: {e}", path.display()))
        })?;
        let metadata = toml::from_str(&contents).map_err(|e| {
            CanopyError::Metadata(format!("Failed to parse metadata file {}: {e}", path.display()))
        })?;
        Ok(Some(metadata))
    }

    /// Persist metadata, creating the metadata directory if needed.
    pub fn write(&self, metadata: &WorkspaceMetadata) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        let path = self.metadata_path();
        let encoded = toml::to_string(metadata)
            .map_err(|e| CanopyError::Metadata(format!("Failed to encode metadata: {e}")))?;
        fs::write(&path, encoded)?;
        Ok(())
    }

    /// Record a base ref for one alias, keeping everything else.
    pub fn set_base_ref(&self, alias: &str, base_ref: &str) -> Result<()> {
        let mut metadata = self.read()?.unwrap_or_default();
        if base_ref.is_empty() {
            metadata.base_refs.remove(alias);
        } else {
            metadata
                .base_refs
                .insert(alias.to_string(), base_ref.to_string());
        }
        self.write(&metadata)
    }

    /// Remove metadata if present, and the metadata directory once empty.
    pub fn remove(&self) -> Result<()> {
        let path = self.metadata_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        if self.base_dir.exists() && fs::read_dir(&self.base_dir)?.next().is_none() {
            fs::remove_dir(&self.base_dir)?;
        }
        Ok(())
    }

    /// Path of the metadata file.
    fn metadata_path(&self) -> PathBuf {
        self.base_dir.join(Self::FILE_NAME)
    }
}
