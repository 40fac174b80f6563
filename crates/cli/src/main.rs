//! PhysioGold CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the chat UI and session API
//! - `init`    Write a default config file
//! - `models`  List the models an API key can use and the one selected
//! - `doctor`  Diagnose configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "physiogold",
    about = "PhysioGold: physical therapy intake and clinical mentor chat",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.physiogold/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server with the embedded chat UI
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List models visible to an API key and show which one would be used
    Models {
        #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
        api_key: String,
    },

    /// Diagnose configuration
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it parses; commands
    // report load errors themselves.
    let logging = commands::load_config(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();
    init_tracing(cli.verbose, cli.json_logs || logging.json, &logging.level);

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(cli.config.as_deref(), host, port).await?
        }
        Commands::Init { force } => commands::init::run(cli.config.as_deref(), force)?,
        Commands::Models { api_key } => {
            commands::models::run(cli.config.as_deref(), &api_key).await?
        }
        Commands::Doctor => commands::doctor::run(cli.config.as_deref())?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
