//! OffSync CLI
//!
//! Command-line tools for inspecting and driving persisted sync state.
//!
//! # Commands
//!
//! - `config` - Print the resolved configuration with value sources
//! - `mode` - Derive the sync mode for a network snapshot
//! - `enqueue` - Queue a send-message action in a store
//! - `inspect` - Show queued actions and the pull cursor
//! - `sanitize` - Run the message sanitizer over a JSON file of drafts
//! - `clear` - Drop the persisted queue and cursor

mod commands;

use clap::{Parser, Subcommand};
use offsync_protocol::Connectivity;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// OffSync command-line tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// JSON file with configuration overrides (camelCase keys)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved configuration
    Config {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Derive the sync mode for a network snapshot
    Mode {
        /// Link type (offline, wifi, cellular, satellite)
        connectivity: Connectivity,

        /// The platform reports the link as constrained
        #[arg(long)]
        constrained: bool,

        /// The link is ultra-constrained
        #[arg(long)]
        ultra: bool,
    },

    /// Queue a send-message action
    Enqueue {
        /// Target conversation
        #[arg(long)]
        conversation: String,

        /// Message text
        #[arg(long)]
        body: String,
    },

    /// Show queued actions and the pull cursor
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the message sanitizer over a JSON file of drafts
    Sanitize {
        /// JSON array of drafts
        input: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop the persisted queue and cursor
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
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

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config { format } => {
            commands::config::run(&config, &format)?;
        }
        Commands::Mode {
            connectivity,
            constrained,
            ultra,
        } => {
            commands::mode::run(&config, connectivity, constrained, ultra);
        }
        Commands::Enqueue { conversation, body } => {
            let path = cli.path.ok_or("Store path required for enqueue")?;
            commands::enqueue::run(&path, &conversation, &body)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Sanitize { input, format } => {
            commands::sanitize::run(&config, &input, &format)?;
        }
        Commands::Clear { yes } => {
            let path = cli.path.ok_or("Store path required for clear")?;
            commands::clear::run(&path, yes)?;
        }
        Commands::Version => {
            println!("OffSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
