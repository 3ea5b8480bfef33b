//! Orchestrator configuration (`synth --config synth.toml`)
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "synth"
//!
//! [ring]
//! name = "samples"
//! size = 33554432
//!
//! [producers]
//! count = 4
//! config = "producer.toml"
//! stagger_ms = 1000
//!
//! [consumer]
//! strategy = "backoff"
//! stats_every = 10000
//!
//! [shutdown]
//! grace_ms = 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use synth_common::config::{ConfigError, ConfigLoader, SharedConfig};
use synth_common::consts::{INITIALIZER_PROGRAM, PRODUCER_PROGRAM};
use synth_common::prelude::{DEFAULT_PRODUCER_STAGGER, DEFAULT_SHUTDOWN_GRACE};
use synth_ring::{PollMode, PollStrategy, RingConfig};

/// Root orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    /// Common fields
    pub shared: SharedConfig,

    /// Shared ring location and geometry
    #[serde(default)]
    pub ring: RingConfig,

    /// Buffer initializer
    #[serde(default)]
    pub initializer: InitializerConfig,

    /// Producer processes
    pub producers: ProducersConfig,

    /// Embedded consumer
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Teardown
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// `[initializer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InitializerConfig {
    /// Program run once, with no arguments, to create the ring
    pub program: PathBuf,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(INITIALIZER_PROGRAM),
        }
    }
}

fn default_count() -> usize {
    1
}

fn default_producer_program() -> PathBuf {
    PathBuf::from(PRODUCER_PROGRAM)
}

fn default_stagger_ms() -> u64 {
    DEFAULT_PRODUCER_STAGGER.as_millis() as u64
}

/// `[producers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducersConfig {
    /// Number of producer processes
    #[serde(default = "default_count")]
    pub count: usize,

    /// Producer program, looked up on PATH when not a path
    #[serde(default = "default_producer_program")]
    pub program: PathBuf,

    /// Config file handed to every producer as its only argument
    pub config: PathBuf,

    /// Delay between producer launches
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
}

impl ProducersConfig {
    /// Delay between producer launches.
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

/// `[consumer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Idle policy between empty polls
    pub strategy: PollMode,
    /// First backoff sleep
    pub min_backoff_us: u64,
    /// Longest backoff sleep
    pub max_backoff_us: u64,
    /// Log statistics every this many samples; 0 disables
    pub stats_every: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            strategy: PollMode::Backoff,
            min_backoff_us: 10,
            max_backoff_us: 1000,
            stats_every: 10_000,
        }
    }
}

impl ConsumerConfig {
    /// Build the configured poll strategy.
    pub fn poll_strategy(&self) -> Box<dyn PollStrategy> {
        self.strategy.build(
            Duration::from_micros(self.min_backoff_us),
            Duration::from_micros(self.max_backoff_us),
        )
    }
}

/// `[shutdown]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time a producer gets to exit after SIGTERM
    pub grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
        }
    }
}

impl ShutdownConfig {
    /// Grace period before SIGKILL.
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl SynthConfig {
    /// Load from a file, resolving a relative producer config path against
    /// the file's directory.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        if config.producers.config.is_relative() {
            if let Some(dir) = path.parent() {
                config.producers.config = dir.join(&config.producers.config);
            }
        }
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an invalid ring, zero
    /// producers, empty program or config paths and inverted backoff bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.ring.validate()?;

        if self.producers.count == 0 {
            return Err(ConfigError::ValidationError(
                "producers.count must be at least 1".to_string(),
            ));
        }
        for (what, path) in [
            ("initializer.program", &self.initializer.program),
            ("producers.program", &self.producers.program),
            ("producers.config", &self.producers.config),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{what} cannot be empty"
                )));
            }
        }
        if self.consumer.min_backoff_us > self.consumer.max_backoff_us {
            return Err(ConfigError::ValidationError(format!(
                "consumer.min_backoff_us {} exceeds max_backoff_us {}",
                self.consumer.min_backoff_us, self.consumer.max_backoff_us
            )));
        }
        Ok(())
    }
}
