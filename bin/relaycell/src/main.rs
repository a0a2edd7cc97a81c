mod commands;

use clap::{Parser, Subcommand};
use relaycell_core::Paths;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "relaycell")]
#[command(about = "Readiness-gated Discord command bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory (defaults to ~/.relaycell)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway supervisor and the HTTP control surface
    Serve {
        /// Host to bind to (overrides config http.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config http.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration status
    Status,

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let paths = cli
        .config_dir
        .map(Paths::with_base)
        .unwrap_or_default();

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(&paths, host, port).await?;
        }
        Commands::Status => {
            commands::status::run(&paths)?;
        }
        Commands::Init { force } => {
            commands::init::run(&paths, force)?;
        }
    }

    Ok(())
}
