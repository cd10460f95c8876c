use anyhow::Result;
use libcanopy::{
    Config, Output, Vcs,
    drift::{self, DriftEntry},
};

use crate::ui::{emit, render_warnings, show_validation};

/// Run the `canopy ls` command logic.
pub fn list(config: &Config, vcs: &dyn Vcs, output: &dyn Output) -> Result<()> {
    let listing = show_validation(output, drift::list(&config.root, vcs))?;
    render_warnings(output, &listing.warnings)?;

    if listing.manifest_entries.is_empty() && listing.extra_entries.is_empty() {
        emit(output.message("No workspaces found."))?;
        return Ok(());
    }

    for entry in &listing.manifest_entries {
        emit(output.message(&entry_line(entry)))?;
    }
    if !listing.extra_entries.is_empty() {
        let section = output.section("not in manifest");
        for entry in &listing.extra_entries {
            emit(section.warn(&entry_line(entry)))?;
        }
    }

    let counts = listing.counts;
    emit(output.message(&format!(
        "applied={} missing={} drift={} extra={}",
        counts.applied, counts.missing, counts.drift, counts.extra
    )))?;
    Ok(())
}

/// One listing line: id, drift label and risk when known.
fn entry_line(entry: &DriftEntry) -> String {
    match entry.risk {
        Some(risk) => format!("{:<24} {:<8} {risk}", entry.id, entry.status),
        None => format!("{:<24} {}", entry.id, entry.status),
    }
}
