//! Producer configuration (`synth_producer <config.toml>`)
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "synth-producer"
//! log_level = "info"
//!
//! [generator]
//! min_height = 16
//! max_height = 64
//! alphabet = "abcdefghijklmnopqrstuvwxyz"
//! max_caption_len = 12
//!
//! [backpressure]
//! lap_margin = 1024   # omit for the ring's min_chunk, 0 disables
//! use_gate = true
//!
//! [run]
//! max_samples = 100000
//! delay_us = 0
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use synth_common::config::{ConfigError, SharedConfig};
use synth_common::consts::MAX_WORD_LENGTH;
use synth_ring::PollMode;

/// Largest image side the generator will produce. A square image of this
/// side still fits the record limit of the default 32 MiB ring.
pub const MAX_SIDE: u32 = 2048;

/// Root producer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Common fields
    pub shared: SharedConfig,

    /// Sample generator
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Ring admission
    #[serde(default)]
    pub backpressure: BackpressureConfig,

    /// Run limits
    #[serde(default)]
    pub run: RunConfig,
}

/// `[generator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Smallest image height
    pub min_height: u32,
    /// Largest image height
    pub max_height: u32,
    /// Smallest image width
    pub min_width: u32,
    /// Largest image width
    pub max_width: u32,
    /// Characters random captions are drawn from
    pub alphabet: String,
    /// Fixed caption vocabulary; when non-empty, captions are picked from it
    pub words: Vec<String>,
    /// Longest random caption, in bytes
    pub max_caption_len: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_height: 8,
            max_height: 64,
            min_width: 8,
            max_width: 256,
            alphabet: "abcdefghijklmnopqrstuvwxyz".to_string(),
            words: Vec::new(),
            max_caption_len: 12,
        }
    }
}

/// `[backpressure]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Lap guard margin in bytes; `None` uses the ring's `min_chunk`, `0`
    /// disables backpressure entirely.
    pub lap_margin: Option<u64>,
    /// Pass through the buffer gate before every claim
    pub use_gate: bool,
    /// Idle policy while held
    pub strategy: PollMode,
    /// First backoff sleep
    pub min_backoff_us: u64,
    /// Longest backoff sleep
    pub max_backoff_us: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            lap_margin: None,
            use_gate: true,
            strategy: PollMode::Backoff,
            min_backoff_us: 10,
            max_backoff_us: 1000,
        }
    }
}

impl BackpressureConfig {
    /// Backoff bounds.
    pub fn backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_micros(self.min_backoff_us),
            Duration::from_micros(self.max_backoff_us),
        )
    }
}

/// `[run]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many samples; run until signalled when unset
    pub max_samples: Option<u64>,
    /// Pause between samples
    pub delay_us: u64,
}

impl RunConfig {
    /// Pause between samples, if any.
    pub fn delay(&self) -> Option<Duration> {
        (self.delay_us > 0).then(|| Duration::from_micros(self.delay_us))
    }
}

impl ProducerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for empty or inverted size
    /// ranges, unusable caption settings and inverted backoff bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let g = &self.generator;
        check_range("height", g.min_height, g.max_height)?;
        check_range("width", g.min_width, g.max_width)?;

        if g.max_caption_len > MAX_WORD_LENGTH {
            return Err(ConfigError::ValidationError(format!(
                "max_caption_len {} exceeds {MAX_WORD_LENGTH}",
                g.max_caption_len
            )));
        }
        if g.words.is_empty() {
            if g.alphabet.is_empty() || g.max_caption_len == 0 {
                return Err(ConfigError::ValidationError(
                    "captions need either words or a non-empty alphabet and max_caption_len"
                        .to_string(),
                ));
            }
            if g.alphabet.contains('\0') {
                return Err(ConfigError::ValidationError(
                    "alphabet cannot contain NUL".to_string(),
                ));
            }
        }
        for word in &g.words {
            if word.len() > MAX_WORD_LENGTH || word.contains('\0') {
                return Err(ConfigError::ValidationError(format!(
                    "word '{word}' is longer than {MAX_WORD_LENGTH} bytes or contains NUL"
                )));
            }
        }

        let b = &self.backpressure;
        if b.min_backoff_us > b.max_backoff_us {
            return Err(ConfigError::ValidationError(format!(
                "min_backoff_us {} exceeds max_backoff_us {}",
                b.min_backoff_us, b.max_backoff_us
            )));
        }
        Ok(())
    }
}

fn check_range(what: &str, min: u32, max: u32) -> Result<(), ConfigError> {
    if min == 0 || min > max || max > MAX_SIDE {
        return Err(ConfigError::ValidationError(format!(
            "{what} range {min}..={max} must be non-empty, positive and at most {MAX_SIDE}"
        )));
    }
    Ok(())
}
