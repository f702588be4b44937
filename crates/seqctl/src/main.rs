//! seqctl - inspect the ALSA sequencer through seqwire
//!
//! Subcommands:
//! - `seqctl info` - protocol, own client and system limits
//! - `seqctl clients` - every client the sequencer knows
//! - `seqctl ports <client>` - ports of one client
//! - `seqctl version` - protocol version and feature gates of this build
//! - `seqctl config` - effective configuration and where it came from

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "seqctl")]
#[command(about = "Inspect the ALSA sequencer through seqwire")]
#[command(version)]
struct Cli {
    /// Config file replacing ./seqwire.toml
    #[arg(short, long, global = true, env = "SEQWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Talk to an in-memory sequencer instead of the device
    #[arg(long, global = true)]
    dry_run: bool,

    /// Open the device nonblocking
    #[arg(long, global = true)]
    nonblock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show protocol, own client and system limits
    Info {
        #[arg(long)]
        json: bool,
    },

    /// List sequencer clients
    Clients {
        #[arg(long)]
        json: bool,
    },

    /// List the ports of a client
    Ports {
        /// Client number
        client: u8,

        #[arg(long)]
        json: bool,
    },

    /// Show the protocol version and feature gates of this build
    Version {
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = seqconf::SeqConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if cli.nonblock {
        config.device.nonblock = true;
    }

    let filter = EnvFilter::try_new(&config.telemetry.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let target = commands::Target {
        device: config.device.clone(),
        dry_run: cli.dry_run,
    };

    debug!(command = ?cli.command, files = ?sources.files, "dispatching");
    match cli.command {
        Commands::Info { json } => commands::info(&target, json)?,
        Commands::Clients { json } => commands::clients(&target, json)?,
        Commands::Ports { client, json } => commands::ports(&target, client, json)?,
        Commands::Version { json } => commands::version(json)?,
        Commands::Config => commands::show_config(&config, &sources),
    }

    Ok(())
}
