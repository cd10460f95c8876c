use anyhow::Result;
use libcanopy::{Config, Output, Vcs, repostore::{self, RepoStores}};

use crate::ui::{emit, render_warnings};

/// Run the `canopy repo get` command logic.
pub fn get(config: &Config, vcs: &dyn Vcs, output: &dyn Output, spec: &str) -> Result<()> {
    let spinner = output.spinner(&format!("Fetching {spec}..."));
    let result = RepoStores::new(config, vcs).ensure(spec);
    spinner.finish_and_clear();
    let store = result?;
    let default_branch = if store.default_branch.is_empty() {
        "none"
    } else {
        store.default_branch.as_str()
    };
    emit(output.success(&format!(
        "{} -> {} (default branch: {default_branch})",
        store.repo_key,
        store.path.display()
    )))?;
    Ok(())
}

/// Run the `canopy repo ls` command logic.
pub fn list(config: &Config, output: &dyn Output) -> Result<()> {
    let (stores, warnings) = repostore::list_stores(&config.root)?;
    render_warnings(output, &warnings)?;
    if stores.is_empty() {
        emit(output.message("No repo stores found."))?;
        return Ok(());
    }
    for store in stores {
        emit(output.message(&format!("{:<48} {}", store.repo_key, store.path.display())))?;
    }
    Ok(())
}
