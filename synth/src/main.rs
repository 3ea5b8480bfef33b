//! # Synth Orchestrator Binary
//!
//! Creates the ring, starts the producers and consumes samples until
//! Ctrl-C, a sample limit, or every producer has exited and the ring is
//! drained.
//!
//! # Usage
//!
//! ```bash
//! synth --config config/synth.toml
//! synth --config config/synth.toml --limit 100000 -v
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use synth::{Orchestrator, SynthConfig};
use synth_common::config::LogLevel;
use synth_ring::init_tracing;
use tracing::{debug, error, info, warn};

/// How long one consumer poll waits before the loop rechecks its exits.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Synth orchestrator
#[derive(Parser, Debug)]
#[command(name = "synth")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Run producers into a shared sample ring and consume their output")]
#[command(long_about = None)]
struct Args {
    /// Orchestrator configuration file
    #[arg(short, long, default_value = "config/synth.toml")]
    config: PathBuf,

    /// Stop after this many samples
    #[arg(short, long)]
    limit: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        // A config error fails before run() installs the configured subscriber
        init_tracing(LogLevel::Info, args.json);
        error!("Synth failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = SynthConfig::load_from(&args.config)?;
    config.validate()?;
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.shared.log_level
    };
    init_tracing(level, args.json);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    let stats_every = config.consumer.stats_every;
    let mut orchestrator = Orchestrator::new(config);
    orchestrator.start()?;

    let started = Instant::now();
    let mut received = 0u64;
    while running.load(Ordering::SeqCst) && args.limit.is_none_or(|limit| received < limit) {
        match orchestrator.next_sample_timeout(POLL_SLICE) {
            Ok(Some(sample)) => {
                received += 1;
                debug!(
                    "Sample {}: {}x{} '{}'{}",
                    received,
                    sample.height,
                    sample.width,
                    sample.caption,
                    if sample.malformed { " (malformed)" } else { "" }
                );
                if stats_every > 0 && received % stats_every == 0 {
                    let rate = received as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
                    info!("{} samples, {:.0}/s", received, rate);
                }
            }
            Ok(None) => {
                if orchestrator.live_producers() == 0 {
                    warn!("All producers exited and the ring is drained");
                    break;
                }
            }
            Err(e) => {
                if let Err(teardown) = orchestrator.shutdown() {
                    warn!("Teardown: {}", teardown);
                }
                return Err(e.into());
            }
        }
    }

    if let Some(stats) = orchestrator.stats() {
        info!(
            "Received {} samples in {:.1}s ({} malformed, {} wraps)",
            received,
            started.elapsed().as_secs_f64(),
            stats.malformed,
            stats.wraps
        );
    }
    orchestrator.shutdown()?;
    Ok(())
}
