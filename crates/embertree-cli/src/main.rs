//! Embertree CLI - serve, check and inspect control-tree descriptions
//!
//! Runs a tree provider over TCP and validates the JSON tree descriptions it
//! serves.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod functions;
mod serve;
mod trees;

use config::{FileConfig, ServeOverrides, ServeSettings};

/// Embertree - control-tree provider for broadcast devices
#[derive(Parser)]
#[command(name = "embertree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "EMBERTREE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a tree description over TCP
    Serve {
        /// Tree description (JSON)
        #[arg(short, long)]
        tree: Option<PathBuf>,

        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Port number
        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Provider name used in logs
        #[arg(short, long)]
        name: Option<String>,

        /// Maximum concurrent consumers
        #[arg(long)]
        max_sessions: Option<usize>,
    },

    /// Validate a tree description
    Check {
        /// Tree description (JSON)
        tree: PathBuf,
    },

    /// Print the tree built from a description
    Dump {
        /// Tree description (JSON)
        tree: PathBuf,
    },

    /// Show version and system info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(()).await;
    });

    match cli.command {
        Commands::Serve {
            tree,
            bind,
            port,
            name,
            max_sessions,
        } => {
            let file = match &cli.config {
                Some(path) => FileConfig::load(path)?,
                None => FileConfig::default(),
            };
            let overrides = ServeOverrides {
                tree,
                bind,
                port,
                name,
                max_sessions,
            };
            let settings = ServeSettings::resolve(file, overrides)?;
            serve::run_serve(settings, &mut shutdown_rx).await?;
        }

        Commands::Check { tree } => {
            trees::check(&tree)?;
        }

        Commands::Dump { tree } => {
            trees::dump(&tree)?;
        }

        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

fn print_info() {
    println!("{}", "Embertree - control-tree provider".cyan().bold());
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    println!("Port:       {} (default)", embertree_core::DEFAULT_PORT);
    println!();
    println!("{}", "Element kinds:".green());
    println!("  - Nodes and parameters");
    println!("  - Functions (echo, sum, concat)");
    println!("  - Matrices (oneToN, oneToOne, nToN)");
    println!();
    println!("{}", "Examples:".green());
    println!("  embertree serve --tree trees/sample.json   # Serve the sample device");
    println!("  embertree check trees/sample.json          # Validate a description");
    println!("  embertree dump trees/sample.json           # Print the loaded tree");
}
