//! rdsconn: local proxy to private RDS instances.
//!
//! Opens a loopback listener and relays each accepted connection through
//! an EC2 Instance Connect Endpoint tunnel to the database's private IP.

mod aws;
mod commands;
mod config;
mod discovery;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

/// rdsconn: RDS connections through EC2 Instance Connect Endpoints
#[derive(Parser)]
#[command(name = "rdsconn", version, about = "Connect to private RDS instances through EC2 Instance Connect Endpoints")]
struct Cli {
    /// AWS region (defaults to the SDK credential chain)
    #[arg(long, global = true)]
    region: Option<String>,

    /// AWS shared config profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List RDS instances in the account
    List {
        /// Print instances as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Proxy local connections to an RDS instance
    #[command(visible_alias = "p")]
    Proxy {
        /// RDS instance identifier (prompts when omitted)
        instance_id: Option<String>,

        /// Instance connect endpoint id (discovered from the VPC when omitted)
        #[arg(long)]
        endpoint_id: Option<String>,

        /// Local port to listen on (0 scans upwards from the database port)
        #[arg(long)]
        local_port: Option<u16>,

        /// Maximum tunnel lifetime in seconds
        #[arg(long)]
        max_tunnel_duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. RUST_LOG wins over the verbosity defaults.
    let (default_filter, with_target) = if cli.verbose {
        ("rdsconn=debug,rdsconn_cli=debug,rdsconn_tunnel=debug,rdsconn_core=debug", true)
    } else {
        ("rdsconn=info,rdsconn_cli=info,rdsconn_tunnel=info", false)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(with_target)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("rdsconn: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load config file.
    let config_path = cli.config.unwrap_or_else(config::Config::default_path);
    let cfg = config::Config::load(&config_path)?;

    // CLI flags override config values.
    let region = cli.region.or_else(|| config::non_empty(&cfg.default.region));
    let profile = cli.profile.or_else(|| config::non_empty(&cfg.default.profile));
    let sdk = aws::load_sdk_config(region, profile).await?;

    match cli.command {
        Some(Command::List { json }) => commands::list::run(&sdk, json).await,
        Some(Command::Proxy {
            instance_id,
            endpoint_id,
            local_port,
            max_tunnel_duration,
        }) => {
            let opts = commands::proxy::ProxyOptions {
                instance_id,
                endpoint_id: endpoint_id.or_else(|| config::non_empty(&cfg.default.endpoint_id)),
                local_port: local_port.unwrap_or(cfg.default.local_port),
                max_tunnel_duration: max_tunnel_duration
                    .unwrap_or(cfg.default.max_tunnel_duration),
            };
            commands::proxy::run(&sdk, opts).await
        }
        None => commands::list::run(&sdk, false).await,
    }
}
