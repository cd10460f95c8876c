use anyhow::Result;
use libcanopy::{Config, Output, Vcs, plan};

use crate::ui::{emit, render_warnings};

/// Run the `canopy import` command logic.
pub fn import(config: &Config, vcs: &dyn Vcs, output: &dyn Output) -> Result<()> {
    let imported = plan::import(&config.root, vcs)?;
    render_warnings(output, &imported.warnings)?;
    emit(output.success(&format!(
        "wrote {} ({} workspaces)",
        imported.path.display(),
        imported.manifest.workspaces.len()
    )))?;
    Ok(())
}
