use std::fs;

use anyhow::{Context, Result};
use libcanopy::{
    Config, Output,
    config::{SETTINGS_FILE, Settings},
    manifest::{self, Manifest},
    paths,
};

use crate::ui::emit;

/// Run the `canopy init` command logic. Existing files are left alone.
pub fn init(config: &Config, output: &dyn Output) -> Result<()> {
    let root = &config.root;
    for dir in [paths::bare_root(root), paths::ws_root(root)] {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    if manifest::path(root).exists() {
        emit(output.message("manifest already exists"))?;
    } else {
        Manifest::new().save(root)?;
        emit(output.message(&format!("created {}", manifest::path(root).display())))?;
    }

    let settings = root.join(SETTINGS_FILE);
    if settings.exists() {
        emit(output.message("settings already exist"))?;
    } else {
        Settings::default().save(root)?;
        emit(output.message(&format!("created {}", settings.display())))?;
    }

    emit(output.success(&format!("initialized {}", root.display())))?;
    Ok(())
}
