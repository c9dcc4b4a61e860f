//! Cinder CLI.

use anyhow::{Context, Result};
use cinder_core::BuildId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "cinder")]
#[command(about = "Cinder build orchestrator", long_about = None)]
struct Cli {
    /// System configuration file
    #[arg(long, global = true, env = "CINDER_CONFIG", default_value = "cinder.kdl")]
    config: PathBuf,

    /// Database URL, overrides `database-url` from the configuration
    #[arg(long, global = true, env = "CINDER_DATABASE_URL")]
    database_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run pending builds once, or a single build by id
    RunBuilds {
        /// Maximum number of builds running at once
        #[arg(long)]
        max_builds: Option<usize>,
        /// Build to run
        build_id: Option<BuildId>,
    },
    /// Control the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Run the daemon loop in the foreground
    Daemonise,
    /// Duplicate the most recent build and run it
    Rebuild,
}

#[derive(Subcommand, Debug)]
enum DaemonCommands {
    /// Start the daemon in the background
    Start,
    /// Stop a running daemon
    Stop,
    /// Report whether the daemon is running
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let home = std::env::current_dir().context("Failed to resolve current directory")?;
    let config = commands::load_config(&cli.config, &home, cli.database_url.clone())?;

    match cli.command {
        Commands::RunBuilds {
            max_builds,
            build_id,
        } => {
            let scheduler = commands::connect(&config, CancellationToken::new()).await?;
            commands::builds::run_builds(&scheduler, max_builds, build_id).await?;
        }
        Commands::Rebuild => {
            let scheduler = commands::connect(&config, CancellationToken::new()).await?;
            commands::builds::rebuild(&scheduler).await?;
        }
        Commands::Daemon { command } => match command {
            DaemonCommands::Start => {
                commands::daemon::start(&config, &cli.config, cli.database_url.as_deref(), cli.verbose)?;
            }
            DaemonCommands::Stop => {
                commands::daemon::stop(&config)?;
            }
            DaemonCommands::Status => {
                commands::daemon::status(&config)?;
            }
        },
        Commands::Daemonise => {
            commands::daemon::daemonise(&config).await?;
        }
    }

    Ok(())
}
