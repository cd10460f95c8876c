#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result, ensure};

/// Return the path to the compiled `canopy` binary for integration-style tests.
pub fn canopy_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_canopy"))
}

/// Run `canopy` against `root` with the provided arguments.
pub fn run_canopy(root: &Path, args: &[&str]) -> Result<Output> {
    Command::new(canopy_binary())
        .arg("--root")
        .arg(root)
        .arg("--no-color")
        .args(args)
        .env_remove("CANOPY_ROOT")
        .env_remove("CANOPY_LOG")
        .output()
        .with_context(|| format!("failed to run canopy {}", args.join(" ")))
}

/// Run `canopy`, failing with its output unless it exits successfully.
pub fn canopy_ok(root: &Path, args: &[&str]) -> Result<String> {
    let output = run_canopy(root, args)?;
    ensure!(
        output.status.success(),
        "canopy {} failed\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a git command inside `repo_path`, ensuring it succeeds.
pub fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .current_dir(repo_path)
        .args(args)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;

    ensure!(
        output.status.success(),
        "git command failed: git {}\nstdout: {}\nstderr: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(output)
}

/// Initialise a repository on `main` at `repo_path` with a README commit.
pub fn init_repository(repo_path: &Path) -> Result<()> {
    fs::create_dir_all(repo_path)?;
    git(repo_path, &["init", "-b", "main"])?;
    git(repo_path, &["config", "user.email", "test@example.com"])?;
    git(repo_path, &["config", "user.name", "Test User"])?;

    fs::write(repo_path.join("README.md"), "# Test Project")?;
    git(repo_path, &["add", "README.md"])?;
    git(repo_path, &["commit", "-m", "Initial commit"])?;

    Ok(())
}

/// Write a manifest file verbatim.
pub fn write_manifest(root: &Path, yaml: &str) -> Result<()> {
    fs::write(root.join("manifest.yaml"), yaml)?;
    Ok(())
}
