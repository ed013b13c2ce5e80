//! rpmsg-sim - Host-side loopback simulator for librpmsg
//!
//! Provides:
//! - Both vrings and their buffer pool in ordinary memory
//! - A host driver that stocks buffers and tracks announced channels
//! - Echo firmware running on the coprocessor transport

mod config;
mod host;
mod memory;

use crate::config::SimConfig;
use crate::host::Simulation;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// rpmsg-sim - exercise the transport against a simulated host
#[derive(Parser, Debug)]
#[command(name = "rpmsg-sim", version, about)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "rpmsg-sim.toml")]
    config: PathBuf,

    /// Number of echo rounds
    #[arg(short, long, default_value_t = 8, env = "RPMSG_SIM_ROUNDS")]
    rounds: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = SimConfig::load(&args.config)?;

    // Initialize logging
    let log_level = if args.debug { "debug" } else { config.daemon.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rpmsg-sim v{} starting", VERSION);
    info!("Configuration loaded from {:?}", args.config);

    if args.write_config {
        config.validate()?;
        config.save(&args.config)?;
        info!("Configuration written to {:?}", args.config);
        return Ok(());
    }

    info!(
        "{} descriptors per ring, {}-byte buffers, channel '{}' on port {}",
        config.ring.num, config.link.buf_size, config.channel.name, config.channel.port
    );

    let mut sim = Simulation::new(&config)?;
    let report = sim.run(args.rounds)?;

    info!(
        "{} rounds: {} echoed, {} dropped, {} kicks, channels {:?}",
        report.rounds, report.echoed, report.dropped, report.kicks, report.channels_seen
    );
    Ok(())
}
