//! peerlink CLI
//!
//! Opens interactive sessions to peers on the overlay network:
//! - `ssh`: terminal session over an ephemeral access grant
//! - `plan`: show the access rule and port a session would use
//! - `config`: manage the configuration file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerlink::commands::{self, PlanProtocol, SshOptions};

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(author, version, about = "Remote-access sessions to overlay peers")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Management API token
    #[arg(long, global = true, env = "PEERLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive terminal session to a peer
    Ssh {
        /// Peer ID
        peer: String,
        /// Remote username (defaults to the configured or local user)
        #[arg(short, long)]
        user: Option<String>,
        /// Remote SSH port
        #[arg(short, long)]
        port: Option<u16>,
        /// Private key for authentication
        #[arg(short, long)]
        identity: Option<PathBuf>,
    },

    /// Show the access rule and port a session to a peer would use
    Plan {
        /// Peer ID
        peer: String,
        /// Remote-control protocol
        #[arg(long, value_enum, default_value_t = PlanProtocol::Ssh)]
        protocol: PlanProtocol,
        /// Port requested by the user
        #[arg(long)]
        port: Option<u16>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Get a config value (e.g., protocol.desktop_port)
    Get {
        /// Dotted key path
        key: String,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = commands::resolve_config_path(cli.config.as_ref());

    match cli.command {
        Commands::Ssh {
            peer,
            user,
            port,
            identity,
        } => {
            let config = commands::load_settings(&config_path)?;
            commands::ssh_command(
                &config,
                cli.token,
                SshOptions {
                    peer,
                    user,
                    port,
                    identity,
                },
            )
            .await?;
        }

        Commands::Plan {
            peer,
            protocol,
            port,
        } => {
            let config = commands::load_settings(&config_path)?;
            commands::plan_command(&config, cli.token, &peer, protocol, port).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_init(&config_path, force)?,
            ConfigAction::Show => commands::config_show(&config_path)?,
            ConfigAction::Get { key } => commands::config_get(&config_path, &key)?,
            ConfigAction::Path => println!("{}", config_path.display()),
        },
    }

    Ok(())
}
