//! Tessera CLI
//!
//! Command-line tools for Tessera dataset maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display file sizes and journal state
//! - `verify` - Check journal checksums and node records
//! - `dump-journal` - Dump journal entries for debugging
//! - `recover` - Open the dataset, replaying the journal, and close it

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tessera command-line dataset tools.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the dataset directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display file sizes and journal state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify dataset integrity
    Verify {
        /// Check journal entries
        #[arg(short, long)]
        journal: bool,

        /// Check node records
        #[arg(short, long)]
        nodes: bool,

        /// Check all (default if no flags specified)
        #[arg(short, long)]
        all: bool,
    },

    /// Dump journal entries for debugging
    DumpJournal {
        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start from this offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay committed journal entries into the base files
    Recover,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Dataset path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify {
            journal,
            nodes,
            all,
        } => {
            let path = cli.path.ok_or("Dataset path required for verify")?;
            let check_all = all || (!journal && !nodes);
            commands::verify::run(&path, journal || check_all, nodes || check_all)?;
        }
        Commands::DumpJournal {
            limit,
            offset,
            format,
        } => {
            let path = cli.path.ok_or("Dataset path required for dump-journal")?;
            commands::dump_journal::run(&path, limit, offset, &format)?;
        }
        Commands::Recover => {
            let path = cli.path.ok_or("Dataset path required for recover")?;
            commands::recover::run(&path)?;
        }
        Commands::Version => {
            println!("Tessera CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
