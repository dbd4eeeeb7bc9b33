//! Command-line interface.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "listwatch", version, about = "Marketplace listing watcher")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true, env = "LISTWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and apply the schema
    Init,
    /// Generate a credential encryption key
    GenerateKey,
    /// Run the watcher worker
    Run {
        /// Drain currently due configs once, then exit
        #[arg(long)]
        once: bool,
    },
}

/// Whether verbose logging was requested. Scanned from raw args because
/// the logging subscriber is installed before clap parses anything.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::cmd_init(&settings).await,
        Commands::GenerateKey => commands::cmd_generate_key(),
        Commands::Run { once } => commands::cmd_run(&settings, once).await,
    }
}
