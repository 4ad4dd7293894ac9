//! ecunet-sim
//!
//! Runs the MCU and its four peripherals on an in-process bus.
//!
//! # Usage
//!
//! ```bash
//! ./ecunet-sim
//! ./ecunet-sim --config config/sim.toml --verbose
//! ./ecunet-sim --no-console --log-format json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ecunet_sim::{ApiClient, Console, Network, SimConfig};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "ecunet-sim")]
#[command(about = "Simulated vehicle diagnostic network (MCU + Battery, Engine, Doors, HVAC)")]
struct Args {
    /// Configuration file path (TOML, or YAML by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for node files and the partition image, overrides the config
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Run without the interactive console; stop with Ctrl+C
    #[arg(long)]
    no_console: bool,

    /// Seconds the console waits for a reply
    #[arg(long, default_value_t = 5)]
    reply_timeout: u64,
}

fn init_logging(args: &Args) {
    let default = if args.verbose {
        "ecunet_uds=debug,ecunet_sim=debug"
    } else {
        "ecunet_uds=info,ecunet_sim=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            SimConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.backing_file = dir.join("partition.img");
        config.data_dir = dir.clone();
    }

    let network = Network::start(&config)
        .await
        .context("Failed to start the network")?;
    info!(nodes = network.nodes().len(), "Network ready");

    if args.no_console {
        info!("Press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
    } else {
        let client = ApiClient::new(network.api());
        let mut console = Console::new(client, Duration::from_secs(args.reply_timeout));
        let stdin = BufReader::new(tokio::io::stdin());

        tokio::select! {
            result = console.run(stdin, tokio::io::stdout()) => {
                if let Err(e) = result {
                    warn!(error = %e, "Console stopped");
                }
            }
            signal = tokio::signal::ctrl_c() => signal?,
        }
    }

    info!("Shutting down");
    network.shutdown().await;
    Ok(())
}
