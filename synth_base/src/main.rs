//! # Synth Buffer Initializer
//!
//! Creates the shared sample ring and the gate semaphore, stamps the ring
//! header ready and exits, leaving both for the orchestrator and producers.
//! The ring location comes from the `SYNTH_RING_*` environment; unset
//! variables fall back to the defaults.
//!
//! # Usage
//!
//! ```bash
//! SYNTH_RING_NAME=samples SYNTH_RING_SIZE=33554432 synth_base
//! ```

use clap::Parser;
use synth_common::config::LogLevel;
use synth_ring::{BufferGate, RingConfig, RingRegion, init_tracing};
use tracing::{error, info, warn};

/// Synth buffer initializer
#[derive(Parser, Debug)]
#[command(name = "synth_base")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Create the shared sample ring from SYNTH_RING_* settings")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Ring initialization failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    init_tracing(level, args.json);

    let config = RingConfig::from_env()?;
    let layout = config.layout()?;
    std::fs::create_dir_all(&config.shm_dir)?;

    // Leftovers from a crashed run would hold stale records and cursors
    if RingRegion::remove(&config)? {
        warn!("Removed stale segment {}", config.segment_path().display());
    }
    if BufferGate::unlink(&config.gate_name())? {
        warn!("Removed stale gate {}", config.gate_name());
    }

    let region = RingRegion::create(&config)?;
    let gate = match BufferGate::create(&config.gate_name()) {
        Ok(gate) => gate,
        Err(e) => {
            // Do not leave a ready ring behind without its gate
            let _ = RingRegion::remove(&config);
            return Err(e.into());
        }
    };

    info!(
        "Ring '{}' ready: {} bytes, records {}..{}, wrap threshold {}, gate {}",
        region.name(),
        layout.size(),
        layout.record_start(),
        layout.size(),
        layout.min_chunk(),
        gate.name()
    );
    Ok(())
}
