//! colsync CLI
//!
//! Command-line tools for colsync sync state.
//!
//! # Commands
//!
//! - `inspect` - Display persisted cursors and failure sets
//! - `reset` - Forget all sync progress for one collection
//! - `simulate` - Run both synchronizers against an in-process server

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// colsync command-line tools.
#[derive(Parser)]
#[command(name = "colsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the prefs file holding sync state
    #[arg(global = true, short, long)]
    prefs: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display persisted sync state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget all sync progress for a collection
    Reset {
        /// Collection name (history, passwords)
        collection: String,
    },

    /// Sync seeded records through an in-process server
    Simulate {
        /// Number of remote history records to seed
        #[arg(long, default_value = "250")]
        history: usize,

        /// Number of remote logins to seed
        #[arg(long, default_value = "25")]
        logins: usize,

        /// History download page size
        #[arg(short, long, default_value = "100")]
        batch_size: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.prefs.ok_or("Prefs path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Reset { collection } => {
            let path = cli.prefs.ok_or("Prefs path required for reset")?;
            commands::reset::run(&path, &collection)?;
        }
        Commands::Simulate {
            history,
            logins,
            batch_size,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                history,
                logins,
                batch_size,
            };
            commands::simulate::run(cli.prefs.as_deref(), &options, &format)?;
        }
        Commands::Version => {
            println!("colsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("storage version {}", colsync_protocol::STORAGE_VERSION);
        }
    }

    Ok(())
}
