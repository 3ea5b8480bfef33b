//! # Synth Producer Binary
//!
//! Started by the orchestrator with exactly one argument, its config file.
//! The ring location comes from the `SYNTH_RING_*` environment.
//!
//! # Usage
//!
//! ```bash
//! synth_producer config/producer.toml
//! ```

use clap::Parser;
use nix::sys::signal::Signal;
use std::path::PathBuf;
use synth_common::config::{ConfigLoader, LogLevel};
use synth_common::supervisor::{die_with_parent, orphaned};
use synth_producer::{NoiseSource, ProducerConfig, SampleSource, connect, produce, seed_from_clock};
use synth_ring::{RingConfig, init_tracing};
use tracing::{error, info};

/// Synth reference producer
#[derive(Parser, Debug)]
#[command(name = "synth_producer")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Publish synthetic samples into the shared ring")]
struct Args {
    /// Producer configuration file
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Before anything else: a producer must not outlive its orchestrator
    die_with_parent(Signal::SIGHUP)?;
    if orphaned() {
        std::process::exit(1);
    }

    let args = Args::parse();
    if let Err(e) = run(&args) {
        // No-op when run() got far enough to install the configured subscriber
        init_tracing(LogLevel::Info, false);
        error!("Producer failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProducerConfig::load(&args.config)?;
    config.validate()?;
    init_tracing(config.shared.log_level, false);

    let ring = RingConfig::from_env()?;
    let mut producer = connect(&ring, &config)?;

    let seed = seed_from_clock();
    let mut source = NoiseSource::new(config.generator.clone(), seed);
    info!(
        "{} (pid {}) producing into '{}' from {} source, seed {:#x}",
        config.shared.service_name,
        std::process::id(),
        ring.name,
        source.name(),
        seed
    );

    produce(&mut producer, &mut source, &config.run)?;
    Ok(())
}
