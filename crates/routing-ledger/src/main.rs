//! Routing ledger inspection tool entry point

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use routing_ledger::{ClusterSnapshot, Config, RoutingLedger};

/// Build a routing ledger from a cluster snapshot and report on it
#[derive(Parser, Debug)]
#[command(name = "ledger-inspect")]
#[command(about = "Inspect the shard routing ledger of a cluster snapshot")]
struct Args {
    /// Cluster snapshot (JSON)
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Build a mutable ledger instead of a read-only one
    #[arg(long)]
    mutable: bool,

    /// Print ledger statistics as JSON
    #[arg(long)]
    stats: bool,

    /// Log level (overrides the configuration file)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Without a configuration file the ledger is read-only
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => {
            let mut config = Config::default();
            config.ledger.read_only = true;
            config
        }
    };

    // Command line flags take precedence over the file
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if args.mutable {
        config.ledger.read_only = false;
    }

    // Logs go to stderr; stdout carries the dump
    tracing_subscriber::fmt()
        .with_max_level(config.log.max_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {}", e))?;

    info!("Inspecting snapshot {}", args.snapshot.display());
    let snapshot = ClusterSnapshot::load(&args.snapshot)?.into_shared();
    let ledger = RoutingLedger::with_config(snapshot, &config.ledger)?;

    ledger.check_consistency()?;
    info!("Ledger is consistent");

    print!("{}", ledger.pretty_print());
    if args.stats {
        println!("{}", serde_json::to_string_pretty(&ledger.stats())?);
    }

    Ok(())
}
