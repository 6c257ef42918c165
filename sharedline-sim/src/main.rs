//! Shared Line pairing simulator
//!
//! Pairs two in-process devices over the in-memory store, discovery, and
//! anchor service, then has both draw strokes and checks they mirror.
//!
//! Usage:
//!   sharedline-sim --seed-strokes 5
//!   sharedline-sim --fail-hosting --verbose

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use sharedline_sim::{SimConfig, run_simulation};
use sharedline_sync::SessionConfig;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "sharedline-sim")]
#[command(about = "Pair two simulated Shared Line devices and exchange strokes")]
struct Args {
    /// Strokes each device draws once synced
    #[arg(short, long, default_value = "3")]
    seed_strokes: usize,

    /// Raw samples per stroke
    #[arg(long, default_value = "60")]
    points_per_stroke: usize,

    /// Make the anchor service reject hosting
    #[arg(long)]
    fail_hosting: bool,

    /// Seed for the simulated hand jitter
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Session config JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let session = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            SessionConfig::from_json(&json).context("invalid session config")?
        }
        None => SessionConfig::default(),
    };
    let config = SimConfig {
        seed_strokes: args.seed_strokes,
        points_per_stroke: args.points_per_stroke,
        fail_hosting: args.fail_hosting,
        seed: args.seed,
        session,
    };

    let report = run_simulation(&config).await?;
    println!("\n{report}");

    if !report.synced() && !args.fail_hosting {
        bail!("devices did not sync");
    }
    info!("simulation finished");
    Ok(())
}
