use std::sync::Arc;

use anyhow::Result;
use libcanopy::{
    Applier, ApplyOptions, ApplyOutcome, CancelToken, Config, Git, Output, Prefetcher, plan,
};

use crate::ui::{emit, render_warnings, show_validation};

/// Run the `canopy apply` command logic.
pub fn apply(
    config: &Config,
    cancel: &CancelToken,
    output: &dyn Output,
    no_prompt: bool,
) -> Result<()> {
    let git = Git::new(cancel.clone(), config.verbose);
    let plan = show_validation(output, plan::plan(&config.root, &git))?;
    render_warnings(output, &plan.warnings)?;

    // Prefetch runs on its own token so a timed-out batch can be abandoned
    // without cancelling the apply.
    let prefetch_cancel = cancel.child();
    let prefetcher = Prefetcher::new(
        Arc::new(Git::new(prefetch_cancel.clone(), config.verbose)),
        config.clone(),
        prefetch_cancel,
    );

    let applier = Applier::new(config, &git, cancel.clone(), output);
    match applier.apply(&plan, ApplyOptions { no_prompt }, prefetcher)? {
        ApplyOutcome::NoChanges => {}
        ApplyOutcome::Declined => emit(output.message("apply declined"))?,
        ApplyOutcome::Canceled => emit(output.message("apply canceled"))?,
        ApplyOutcome::Applied(summary) => render_warnings(output, &summary.warnings)?,
    }
    Ok(())
}
