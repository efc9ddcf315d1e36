use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the convergence engine.
#[derive(Parser, Debug)]
#[command(
    name = "converge",
    about = "Catalog-driven configuration convergence engine",
    version = option_env!("CONVERGE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Converge the local machine to a catalog
    Apply(ApplyArgs),
    /// Transpile a catalog into a self-contained bash script on stdout
    Script(ScriptArgs),
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyArgs {
    /// Catalog file (reads stdin when absent)
    pub catalog: Option<PathBuf>,

    /// Dry-run: report changes without mutating the system
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Suppress info messages and failure output
    #[arg(short, long)]
    pub quiet: bool,

    /// Show commands run in the log
    #[arg(short = 's', long)]
    pub show_commands: bool,

    /// Maximum number of resources to apply simultaneously
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Path to bash shell
    #[arg(long, default_value = crate::apply::DEFAULT_BASH_PATH)]
    pub bash: PathBuf,

    /// Run every command unconditionally, ignoring exec conditions
    #[arg(long)]
    pub skip_conditions: bool,
}

/// Options for the `script` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ScriptArgs {
    /// Catalog file (reads stdin when absent)
    pub catalog: Option<PathBuf>,
}
