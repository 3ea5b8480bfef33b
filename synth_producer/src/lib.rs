//! # Synth Reference Producer
//!
//! Attaches to the shared ring created by `synth_base`, then publishes
//! generated samples until a sample limit or a termination signal.
//!
//! - [`config`] - `ProducerConfig` and its TOML sections
//! - [`generator`] - the `SampleSource` seam and the bundled `NoiseSource`

pub mod config;
pub mod generator;

pub use config::{BackpressureConfig, GeneratorConfig, ProducerConfig, RunConfig};
pub use generator::{NoiseSource, SampleSource, seed_from_clock};

use synth_common::config::ConfigError;
use synth_ring::{
    Backpressure, BufferGate, LapGuard, RingConfig, RingProducer, ShmError, Unbounded,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Producer process errors.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// Ring operation failed
    #[error("ring: {0}")]
    Ring(#[from] ShmError),
}

/// Backpressure policy for a ring.
pub fn backpressure_for(config: &BackpressureConfig, ring: &RingConfig) -> Box<dyn Backpressure> {
    match config.lap_margin {
        Some(0) => Box::new(Unbounded),
        Some(margin) => Box::new(LapGuard::new(margin)),
        None => Box::new(LapGuard::new(ring.min_chunk as u64)),
    }
}

/// Attach a ring producer configured from `config`.
///
/// A missing gate is not fatal: the producer then runs ungated.
pub fn connect(ring: &RingConfig, config: &ProducerConfig) -> Result<RingProducer, ProducerError> {
    let (min, max) = config.backpressure.backoff();
    let producer = RingProducer::attach(
        ring,
        backpressure_for(&config.backpressure, ring),
        config.backpressure.strategy.build(min, max),
    )?;

    if !config.backpressure.use_gate {
        return Ok(producer);
    }
    match BufferGate::open(&ring.gate_name()) {
        Ok(gate) => Ok(producer.with_gate(gate)),
        Err(e) => {
            warn!("Running without gate: {}", e);
            Ok(producer)
        }
    }
}

/// Publish samples from `source` until `run.max_samples` is reached.
///
/// Returns the number of samples published. Without a limit this only
/// returns on error.
pub fn produce(
    producer: &mut RingProducer,
    source: &mut dyn SampleSource,
    run: &RunConfig,
) -> Result<u64, ProducerError> {
    let delay = run.delay();
    let mut published = 0u64;

    while run.max_samples.is_none_or(|max| published < max) {
        let sample = source.next_sample()?;
        let offset = producer.publish(&sample)?;
        debug!(
            "Published {}x{} '{}' at {}",
            sample.height, sample.width, sample.caption, offset
        );
        published += 1;

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    let stats = producer.stats();
    info!(
        "Published {} samples ({} holds, {} contended claims, {} wraps)",
        stats.published, stats.holds, stats.contended, stats.wraps
    );
    Ok(published)
}
