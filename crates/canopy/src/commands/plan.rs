use anyhow::Result;
use libcanopy::{Config, Output, Vcs, plan};

use crate::ui::{render_warnings, show_validation};

/// Run the `canopy plan` command logic.
pub fn plan(config: &Config, vcs: &dyn Vcs, output: &dyn Output) -> Result<()> {
    let plan = show_validation(output, plan::plan(&config.root, vcs))?;
    render_warnings(output, &plan.warnings)?;
    plan.render(output)?;
    Ok(())
}
