use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::cli::simulate::Topology;
use crate::config::MeshmeetConfig;

#[derive(Parser)]
#[command(name = "meshmeet")]
#[command(about = "Grow a full mesh of peers out of pairwise invitations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding meshmeet.toml (defaults to ~/.meshmeet)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a rendezvous beacon in the foreground
    Beacon(BeaconArgs),

    /// Start a node and print invitations for others to join it
    Host(HostArgs),

    /// Join a mesh with an invitation
    Join(JoinArgs),

    /// Form a mesh of in-process nodes and print every node's peers
    Simulate(SimulateArgs),
}

#[derive(Parser)]
struct BeaconArgs {
    /// Port to listen on (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,
}

#[derive(Parser)]
struct HostArgs {
    /// Beacon url (overrides [rendezvous] url)
    #[arg(long)]
    url: Option<String>,

    /// How many invitations to print
    #[arg(short = 'n', long, default_value = "1")]
    invitations: usize,
}

#[derive(Parser)]
struct JoinArgs {
    /// Invitation url printed by `meshmeet host`
    invitation: String,
}

#[derive(Parser)]
struct SimulateArgs {
    /// Number of nodes
    #[arg(short, long, default_value = "5")]
    nodes: usize,

    /// Who invites each new node
    #[arg(short, long, value_enum, default_value = "chain")]
    topology: Topology,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "meshmeet=debug,mesh_protocol=debug,rendezvous=debug,info"
    } else {
        "meshmeet=info,mesh_protocol=info,rendezvous=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = MeshmeetConfig::load(cli.config_dir)?;
    info!("Configuration loaded from {}", config.config_dir.display());

    match cli.command {
        Commands::Beacon(args) => {
            let mut beacon = config.beacon();
            if let Some(port) = args.port {
                beacon.port = port;
            }
            if let Some(host) = args.host {
                beacon.host = host;
            }
            cli::beacon::beacon_command(beacon).await
        }
        Commands::Host(args) => {
            let url = args
                .url
                .unwrap_or_else(|| config.rendezvous_url().to_string());
            cli::session::host_command(&url, args.invitations, config.node()).await
        }
        Commands::Join(args) => cli::session::join_command(&args.invitation, config.node()).await,
        Commands::Simulate(args) => {
            cli::simulate::simulate_command(args.nodes, args.topology, config.node()).await
        }
    }
}
