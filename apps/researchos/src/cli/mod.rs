//! # ResearchOS CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create a new database
//! - `status` - Show database counts
//! - `compact` - Reclaim free space in the database file
//! - `packages` - Build and bridge the runnable graph of package files
//! - `link` - Link the inputs of a processing step
//! - `pipeline` - Show the pipeline graph
//! - `subset` - Resolve a subset against its dataset

mod commands;

use crate::settings::{Backend, Settings};
use clap::{Parser, Subcommand};
use researchos_core::RosError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// ResearchOS - versioned research data and pipeline linking
#[derive(Parser, Debug)]
#[command(name = "ros")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database (overrides ros.toml)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides ros.toml)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Settings file (default: ./ros.toml when present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Show database counts
    Status,

    /// Reclaim free space in the database file
    Compact,

    /// Build the runnable graph of package files and apply their bridges
    Packages {
        /// Package TOML files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Link the inputs of a processing step to earlier outputs
    Link {
        /// Process id (PR...)
        step: String,
    },

    /// Show the pipeline graph
    Pipeline,

    /// Resolve a subset against its dataset
    Subset {
        /// Subset id (SS...)
        subset: String,
    },
}

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), RosError> {
    let settings =
        Settings::load(cli.config.as_deref())?.with_overrides(cli.database, cli.backend);
    let out = Output {
        json: cli.json_mode,
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&settings, out, force),
        Some(Commands::Status) | None => cmd_status(&settings, out),
        Some(Commands::Compact) => cmd_compact(&settings, out),
        Some(Commands::Packages { files }) => cmd_packages(&settings, out, &files),
        Some(Commands::Link { step }) => cmd_link(&settings, out, &step),
        Some(Commands::Pipeline) => cmd_pipeline(&settings, out),
        Some(Commands::Subset { subset }) => cmd_subset(&settings, out, &subset),
    }
}
