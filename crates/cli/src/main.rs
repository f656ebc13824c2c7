//! Parley CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the chat server
//! - `init`    — Write the default config
//! - `config`  — Print the effective config
//! - `doctor`  — Diagnose config, backend, and history store

use clap::{Parser, Subcommand};
use parley_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley — two-person chat rooms with a streaming AI assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write the default configuration file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (file plus environment)
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },

    /// Diagnose system health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over both flags
    let verbose = cli.verbose || AppConfig::load().is_ok_and(|c| c.verbose);
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path().await?
            } else {
                commands::config_cmd::show().await?
            }
        }
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
