//! # Refgraph CLI Module
//!
//! ## Available Commands
//!
//! - `check` - Decode and re-encode a document, fail unless byte-identical
//! - `replay` - Apply event batches to a snapshot
//! - `inspect` - Summarize a snapshot

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use refgraph_core::RefgraphError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Refgraph - reference-preserving JSON graph tool
///
/// Checks encoded documents and replays event batches against snapshots.
#[derive(Parser, Debug)]
#[command(name = "refgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Marker-key prefix (overrides the config file; may be empty)
    #[arg(short, long, global = true)]
    pub prefix: Option<String>,

    /// Path to a TOML config file (default: ./refgraph.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a document and verify re-encoding reproduces it exactly
    Check {
        /// Encoded document
        doc: PathBuf,
    },

    /// Apply event batches to a snapshot in order
    Replay {
        /// Snapshot to start from
        snapshot: PathBuf,

        /// Batch files, applied in the given order
        #[arg(required = true)]
        batches: Vec<PathBuf>,

        /// Write the resulting snapshot here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show transaction, property table and object table of a snapshot
    Inspect {
        /// Snapshot to summarize
        snapshot: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), RefgraphError> {
    let settings = Config::load(cli.config.as_deref())?.resolve(cli.prefix, cli.json_mode);
    let quiet = cli.quiet;

    match cli.command {
        Commands::Check { doc } => cmd_check(&doc, &settings, quiet),
        Commands::Replay {
            snapshot,
            batches,
            output,
        } => cmd_replay(&snapshot, &batches, output.as_deref(), &settings, quiet),
        Commands::Inspect { snapshot } => cmd_inspect(&snapshot, &settings),
    }
}
