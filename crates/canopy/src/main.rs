#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Command-line interface for managing canopy workspaces via the libcanopy crate.

use std::{
    io::{self, IsTerminal, Write},
    path::PathBuf,
    process,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use libcanopy::{CancelToken, CanopyError, Config, Git, Output, Quiet, Terminal};
use tracing_subscriber::EnvFilter;

/// Subcommand implementations.
mod commands;
/// Shared rendering and output helpers.
mod ui;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "CANOPY_LOG";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for canopy.
struct Cli {
    /// Override the canopy root directory
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Enable colored output
    #[arg(long, global = true)]
    color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// Suppress all output
    #[arg(long, global = true)]
    quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    no_prompt: bool,

    /// Echo git commands and engine steps
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    /// The primary command to execute.
    command: Commands,
}

#[derive(Subcommand)]
/// CLI subcommands supported by canopy.
enum Commands {
    /// Create the root layout, an empty manifest and default settings
    Init,

    /// Show what applying the manifest would change
    Plan,

    /// Apply the manifest to the workspaces on disk
    Apply,

    /// Write the workspaces on disk as the manifest
    Import,

    /// List manifest workspaces with their drift and risk
    #[command(alias = "list")]
    Ls,

    /// Show the status of every repo in a workspace
    Status {
        /// Workspace id
        id: String,
    },

    /// Manage bare repository stores
    Repo {
        #[command(subcommand)]
        /// Repo store action.
        command: RepoCommands,
    },
}

#[derive(Subcommand)]
/// Actions on bare repository stores.
enum RepoCommands {
    /// Clone or refresh the store for a repo
    Get {
        /// Repo URL, key (host/owner/name) or owner/name shorthand
        spec: String,
    },

    /// List the stores under the root
    Ls,
}

/// Install the tracing subscriber. `CANOPY_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,canopy=debug,libcanopy=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("Failed to install log subscriber: {e}");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Determine color output preference early for error handling
    let color = if cli.color {
        true
    } else if cli.no_color {
        false
    } else {
        io::stdout().is_terminal()
    };

    let output: Arc<dyn Output> = if cli.quiet {
        Arc::new(Quiet)
    } else {
        Arc::new(Terminal::new(color))
    };

    if let Err(e) = run(cli, output.as_ref()) {
        // Reset any existing colors only if color was enabled and stdout is a TTY
        if color && io::stdout().is_terminal() {
            print!("\x1b[0m");
            if let Err(flush_err) = io::stdout().flush() {
                eprintln!("Failed to flush stdout while resetting colors: {flush_err}");
            }
        }

        let exit_code = match e.downcast_ref::<CanopyError>() {
            Some(err @ (CanopyError::UserAborted | CanopyError::Cancelled)) => {
                if let Err(finish_err) = output.finish() {
                    eprintln!("Failed to flush output handler: {finish_err:#}");
                }
                err.exit_code()
            }
            Some(err) => {
                report_failure(output.as_ref(), &e);
                err.exit_code()
            }
            None => {
                report_failure(output.as_ref(), &e);
                1
            }
        };

        process::exit(exit_code);
    }
    Ok(())
}

/// Show a fatal error through the output handler, falling back to stderr.
fn report_failure(output: &dyn Output, e: &anyhow::Error) {
    if let Err(display_err) = output.fail(&format!("{e:#}")) {
        eprintln!("Failed to report error via output handler: {display_err:#}");
    }
    if let Err(finish_err) = output.finish() {
        eprintln!("Failed to flush output handler: {finish_err:#}");
    }
}

/// Execute the selected CLI command using the provided output implementation.
fn run(cli: Cli, output: &dyn Output) -> Result<()> {
    let config = Config::load(cli.root.as_deref(), cli.verbose)
        .context("Failed to load configuration")?;
    let cancel = CancelToken::new();
    let git = Git::new(cancel.clone(), config.verbose);

    match cli.command {
        Commands::Init => commands::init::init(&config, output),
        Commands::Plan => commands::plan::plan(&config, &git, output),
        Commands::Apply => commands::apply::apply(&config, &cancel, output, cli.no_prompt),
        Commands::Import => commands::import::import(&config, &git, output),
        Commands::Ls => commands::list::list(&config, &git, output),
        Commands::Status { id } => commands::status::status(&config, &git, output, &id),
        Commands::Repo { command } => match command {
            RepoCommands::Get { spec } => commands::repo::get(&config, &git, output, &spec),
            RepoCommands::Ls => commands::repo::list(&config, output),
        },
    }
}
