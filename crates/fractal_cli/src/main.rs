//! Fractal CLI
//!
//! Command-line tools for fractal cache snapshots.
//!
//! # Commands
//!
//! - `plan` - Show the requests an intent needs against a snapshot
//! - `simulate` - Resolve an intent against an in-memory dataset
//! - `inspect` - Display snapshot statistics and bindings

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::SimulateOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fractal cache command-line tools.
#[derive(Parser)]
#[command(name = "fractal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the fetch plan of an intent against a snapshot
    Plan {
        /// Snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Intent file
        #[arg(short, long)]
        intent: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve an intent against an in-memory dataset
    Simulate {
        /// Dataset file (schema and entities)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Intent file
        #[arg(short, long)]
        intent: PathBuf,

        /// Start from this snapshot instead of an empty cache
        #[arg(long)]
        from: Option<PathBuf>,

        /// Maximum plan-execute rounds
        #[arg(short, long, default_value = "8")]
        rounds: usize,

        /// Run up to this many requests at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Write the final snapshot here
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display snapshot statistics and bindings
    Inspect {
        /// Snapshot file
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Plan {
            snapshot,
            intent,
            format,
        } => {
            commands::plan::run(&snapshot, &intent, &format)?;
        }
        Commands::Simulate {
            dataset,
            intent,
            from,
            rounds,
            concurrency,
            out,
            format,
        } => {
            let options = SimulateOptions {
                dataset: &dataset,
                intent: &intent,
                from: from.as_deref(),
                rounds,
                concurrency,
            };
            commands::simulate::run(&options, out.as_deref(), &format)?;
        }
        Commands::Inspect { snapshot, format } => {
            commands::inspect::run(&snapshot, &format)?;
        }
        Commands::Version => {
            println!("Fractal CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Snapshot format v{}", fractal_cache::SNAPSHOT_VERSION);
        }
    }

    Ok(())
}
