//! Tether CLI
//!
//! Command-line tools for the mutation queue journal.
//!
//! # Commands
//!
//! - `inspect` - Display journal statistics
//! - `dump` - List queued changes or raw journal records
//! - `verify` - Check frame checksums and record decoding
//! - `compact` - Rewrite the journal with only live changes
//! - `drop` - Remove one queued change without replaying it

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tether queue journal tools.
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue journal
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
    /// Display journal statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued changes in replay order
    Dump {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Dump raw journal records instead of live changes
        #[arg(short, long)]
        records: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify frame checksums and record decoding
    Verify,

    /// Rewrite the journal with only live changes
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Remove a queued change without replaying it
    Drop {
        /// Queue id of the change
        queue_id: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            limit,
            records,
            format,
        } => {
            let path = cli.path.ok_or("Journal path required for dump")?;
            commands::dump::run(&path, limit, records, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Drop { queue_id } => {
            let path = cli.path.ok_or("Journal path required for drop")?;
            commands::drop::run(&path, &queue_id)?;
        }
        Commands::Version => {
            println!("Tether CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
