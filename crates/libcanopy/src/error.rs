use std::{fmt, io, result::Result as StdResult};

use thiserror::Error;

use crate::{manifest::ValidationIssue, output::OutputError};

/// Custom Result type for canopy operations.
pub type Result<T> = StdResult<T, CanopyError>;

/// Canopy-specific error types
#[derive(Error, Debug)]
pub enum CanopyError {
    /// The manifest failed structural or semantic validation.
    #[error("manifest validation failed: {} issue(s)", issues.len())]
    Validation {
        /// Every issue found in the manifest.
        issues: Vec<ValidationIssue>,
    },

    /// A destructive plan was submitted without interactive confirmation.
    #[error("destructive changes require confirmation")]
    DestructiveNeedsConfirmation,

    /// A bare repo store that must already exist is absent.
    #[error("repo store not found for {repo_key}, run: canopy repo get {repo_key}")]
    StoreNotFound {
        /// Canonical key of the missing store.
        repo_key: String,
    },

    /// The input could not be interpreted as a repository spec.
    #[error("invalid repo spec '{input}': {reason}")]
    InvalidRepoSpec {
        /// Raw input as supplied.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// An operation on a single workspace failed.
    #[error("workspace {id}: {message}")]
    Workspace {
        /// Workspace identifier.
        id: String,
        /// Human-readable error description.
        message: String,
    },

    /// A git command failed.
    #[error("Git error: {0}")]
    Git(String),

    /// One or more prefetch tasks failed or the batch timed out.
    #[error("prefetch failed: {0}")]
    Prefetch(String),

    /// The manifest could not be read, parsed or written.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Workspace metadata could not be read or written.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Settings could not be resolved.
    #[error("Config error: {0}")]
    Config(String),

    /// The shared cancellation token fired while work was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The user aborted an interactive prompt.
    #[error("Aborted by user")]
    UserAborted,

    /// Rendering or prompting through the output layer failed.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CanopyError {
    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UserAborted | Self::Cancelled => 130,
            Self::DestructiveNeedsConfirmation | Self::Workspace { .. } => 2,
            Self::Validation { .. } | Self::InvalidRepoSpec { .. } => 3,
            Self::Git(_) | Self::StoreNotFound { .. } => 4,
            _ => 1,
        }
    }
}

/// A non-fatal problem accumulated alongside a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// What the warning is about, e.g. `workspace W1 metadata`.
    pub scope: String,
    /// Human-readable description.
    pub message: String,
}

impl Warning {
    /// Build a warning from a scope and any displayable cause.
    pub fn new(scope: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            scope: scope.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.message)
    }
}
