use std::result::Result as StdResult;

use anyhow::Result;
use libcanopy::{CanopyError, Output, OutputError, Warning, manifest::ValidationIssue};

/// Convert output-layer failures into domain errors.
pub fn map_output_error(err: OutputError) -> CanopyError {
    match err {
        OutputError::Cancelled => CanopyError::UserAborted,
        other => CanopyError::Output(other),
    }
}

/// Emit an output result, mapping errors into `CanopyError`.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result.map_err(map_output_error)?;
    Ok(())
}

/// Show accumulated warnings, one per line.
pub fn render_warnings(output: &dyn Output, warnings: &[Warning]) -> Result<()> {
    for warning in warnings {
        emit(output.warn(&format!("warning: {warning}")))?;
    }
    Ok(())
}

/// List manifest validation issues under a header.
pub fn render_issues(output: &dyn Output, issues: &[ValidationIssue]) -> Result<()> {
    let section = output.section("manifest is invalid");
    for issue in issues {
        emit(section.fail(&issue.to_string()))?;
    }
    Ok(())
}

/// Surface validation issues before handing the error back.
pub fn show_validation<T>(output: &dyn Output, result: libcanopy::Result<T>) -> Result<T> {
    match result {
        Err(CanopyError::Validation { issues }) => {
            render_issues(output, &issues)?;
            Err(CanopyError::Validation { issues }.into())
        }
        other => Ok(other?),
    }
}
