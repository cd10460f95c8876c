#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Core library for canopy, a declarative manager for fleets of git
//! workspaces.
//!
//! A manifest describes the workspaces that should exist and the repos
//! checked out in each. This crate snapshots what is on disk, diffs it
//! against the manifest, classifies how risky each change is, and applies
//! plans on top of shared bare repository stores. The CLI binary in
//! `crates/canopy` builds on top of this library.

/// Applying plans: confirmation, prefetch and worktree changes.
pub mod apply;
/// Cancellation shared by every VCS call of an invocation.
pub mod cancel;
/// Settings file, environment overrides and the resolved configuration.
pub mod config;
/// Manifest entries labelled against the filesystem.
pub mod drift;
/// Error type, warnings and exit codes.
pub mod error;
/// The VCS capability and its `git` implementation.
pub mod git;
/// Desired and actual workspace inventories.
pub mod inventory;
/// The manifest file.
pub mod manifest;
/// Per-workspace metadata files.
pub mod metadata;
/// Output channel abstractions and implementations.
pub mod output;
/// Layout of a canopy root.
pub mod paths;
/// Planning and importing against a root.
pub mod plan;
/// Pure diffing of inventories.
pub mod planner;
/// Concurrent store warm-up ahead of an apply.
pub mod prefetch;
/// Repo keys and remote URLs.
pub mod repospec;
/// Bare repository stores.
pub mod repostore;
/// Risk classification of working trees.
pub mod risk;
/// Building the actual inventory from disk.
pub mod snapshot;

/// In-memory doubles for tests.
#[cfg(test)]
mod testing;

/// Re-exports of the types most callers need.
pub use apply::{Applier, ApplyOptions, ApplyOutcome, ApplySummary};
pub use cancel::CancelToken;
pub use config::Config;
pub use error::{CanopyError, Result, Warning};
pub use git::{Git, Vcs};
pub use output::{Output, OutputError, Quiet, Terminal};
pub use plan::Plan;
pub use prefetch::Prefetcher;
pub use repospec::RepoKey;
