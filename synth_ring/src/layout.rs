//! Ring geometry and the `[ring]` configuration section
//!
//! [`RingLayout`] is the validated, offset-level view every participant
//! computes from the same [`RingConfig`]. The config travels from the
//! orchestrator to its children through `SYNTH_RING_*` environment variables.
//!
//! Both header cursors hold ring positions, `lap * size + offset`, that only
//! ever grow. During lap 0 a position equals its byte offset, so a freshly
//! initialized header (both cursors at `record_start`) is a valid position.

use crate::error::{ShmError, ShmResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use synth_common::config::ConfigError;
use synth_common::consts::{
    DEFAULT_MIN_CHUNK, DEFAULT_RECORD_START, DEFAULT_RING_NAME, DEFAULT_RING_SIZE,
    DEFAULT_SHM_DIR, HEADER_MIN_LEN, NO_SPACE_TO_PRODUCE, RECORD_ALIGN, RECORD_HEADER_LEN,
    RING_MAX_SIZE, RING_MIN_SIZE, SEGMENT_PREFIX,
};

/// Environment variable carrying the ring name.
pub const ENV_RING_NAME: &str = "SYNTH_RING_NAME";
/// Environment variable carrying the segment directory.
pub const ENV_RING_DIR: &str = "SYNTH_RING_DIR";
/// Environment variable carrying the region size in bytes.
pub const ENV_RING_SIZE: &str = "SYNTH_RING_SIZE";
/// Environment variable carrying the first record offset.
pub const ENV_RING_RECORD_START: &str = "SYNTH_RING_RECORD_START";
/// Environment variable carrying the wrap threshold.
pub const ENV_RING_MIN_CHUNK: &str = "SYNTH_RING_MIN_CHUNK";

/// Round `value` up to the next record boundary.
#[inline]
pub const fn align_up(value: u64) -> u64 {
    let mask = RECORD_ALIGN as u64 - 1;
    (value + mask) & !mask
}

/// Encoded length of a record carrying `payload_len` image bytes, padding included.
#[inline]
pub const fn record_len(payload_len: u64) -> u64 {
    align_up(RECORD_HEADER_LEN as u64 + payload_len)
}

/// Validate region size constraints
pub fn validate_segment_size(size: usize) -> ShmResult<()> {
    if size < RING_MIN_SIZE {
        return Err(ShmError::InvalidSize { size });
    }

    if size > RING_MAX_SIZE {
        return Err(ShmError::InvalidSize { size });
    }

    // Must be page-aligned (4KB on most systems)
    if size % RING_MIN_SIZE != 0 {
        return Err(ShmError::InvalidSize { size });
    }

    Ok(())
}

/// Validated ring geometry, in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    size: u64,
    record_start: u64,
    min_chunk: u64,
}

impl RingLayout {
    /// Build a layout, checking that the parameters agree with each other.
    pub fn new(size: usize, record_start: usize, min_chunk: usize) -> ShmResult<Self> {
        validate_segment_size(size)?;

        if record_start < HEADER_MIN_LEN || record_start % RECORD_ALIGN != 0 {
            return Err(ShmError::InvalidLayout {
                reason: format!(
                    "record_start {record_start} must be a multiple of {RECORD_ALIGN} and at least {HEADER_MIN_LEN}"
                ),
            });
        }
        if min_chunk < RECORD_HEADER_LEN || min_chunk % RECORD_ALIGN != 0 {
            return Err(ShmError::InvalidLayout {
                reason: format!(
                    "min_chunk {min_chunk} must be a multiple of {RECORD_ALIGN} and at least {RECORD_HEADER_LEN}"
                ),
            });
        }
        // Room for the largest record twice over keeps record_start out of
        // the wrap zone and lets at least a bare header through
        if record_start + min_chunk + 2 * RECORD_HEADER_LEN > size {
            return Err(ShmError::InvalidLayout {
                reason: format!(
                    "record_start {record_start} + min_chunk {min_chunk} leaves no record area in {size} bytes"
                ),
            });
        }

        Ok(Self {
            size: size as u64,
            record_start: record_start as u64,
            min_chunk: min_chunk as u64,
        })
    }

    /// Total region size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset of the first record.
    pub fn record_start(&self) -> u64 {
        self.record_start
    }

    /// Wrap threshold.
    pub fn min_chunk(&self) -> u64 {
        self.min_chunk
    }

    /// Bytes available to records.
    pub fn capacity(&self) -> u64 {
        self.size - self.record_start
    }

    /// Whether `offset` is too close to the region end to start a record.
    pub fn in_wrap_zone(&self, offset: u64) -> bool {
        offset.saturating_add(self.min_chunk) >= self.size
    }

    /// Whether a reader positioned at `offset` that observed `marker` must
    /// continue at `record_start` instead.
    pub fn should_wrap(&self, offset: u64, marker: u64) -> bool {
        offset < self.record_start || self.in_wrap_zone(offset) || marker == NO_SPACE_TO_PRODUCE
    }

    /// Byte offset of a ring position.
    pub fn offset_of(&self, position: u64) -> u64 {
        position % self.size
    }

    /// Lap of a ring position.
    pub fn lap_of(&self, position: u64) -> u64 {
        position / self.size
    }

    /// Ring position of `offset` during `lap`. Saturates instead of wrapping
    /// around `u64`.
    pub fn position(&self, lap: u64, offset: u64) -> u64 {
        lap.saturating_mul(self.size).saturating_add(offset)
    }

    /// Map a cursor position to the position a reader would actually read next.
    ///
    /// An unset offset means `record_start` of the same lap; an offset inside
    /// the wrap zone means `record_start` of the following lap. Positions near
    /// `u64::MAX` saturate rather than overflow.
    pub fn canonical(&self, position: u64) -> u64 {
        let lap = self.lap_of(position);
        let offset = self.offset_of(position);
        if offset < self.record_start {
            self.position(lap, self.record_start)
        } else if self.in_wrap_zone(offset) {
            self.position(lap.saturating_add(1), self.record_start)
        } else {
            position
        }
    }

    /// Largest record that can ever be placed.
    ///
    /// A record restarting at `record_start` must end before the earliest
    /// offset a wrap sentinel can sit at, with `min_chunk` to spare, or it
    /// would overwrite the sentinel the consumer has yet to read.
    pub fn max_record_len(&self) -> u64 {
        ((self.size - self.record_start - self.min_chunk) / 2) & !(RECORD_ALIGN as u64 - 1)
    }
}

fn default_name() -> String {
    DEFAULT_RING_NAME.to_string()
}

fn default_shm_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SHM_DIR)
}

fn default_size() -> usize {
    DEFAULT_RING_SIZE
}

fn default_record_start() -> usize {
    DEFAULT_RECORD_START
}

fn default_min_chunk() -> usize {
    DEFAULT_MIN_CHUNK
}

/// `[ring]` section: where the region lives and how it is laid out.
///
/// # TOML Example
///
/// ```toml
/// [ring]
/// name = "samples"
/// shm_dir = "/dev/shm"
/// size = 33554432
/// record_start = 64
/// min_chunk = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Ring name; the segment file is `synth_<name>` and the gate `/synth_<name>_gate`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory holding the segment file.
    #[serde(default = "default_shm_dir")]
    pub shm_dir: PathBuf,

    /// Region size in bytes.
    #[serde(default = "default_size")]
    pub size: usize,

    /// Offset of the first record.
    #[serde(default = "default_record_start")]
    pub record_start: usize,

    /// Wrap threshold in bytes.
    #[serde(default = "default_min_chunk")]
    pub min_chunk: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            shm_dir: default_shm_dir(),
            size: default_size(),
            record_start: default_record_start(),
            min_chunk: default_min_chunk(),
        }
    }
}

impl RingConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an empty or path-like name
    /// and for any geometry [`RingLayout::new`] rejects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "ring name cannot be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::ValidationError(format!(
                "ring name '{}' may only contain [A-Za-z0-9_-]",
                self.name
            )));
        }
        self.layout()
            .map(|_| ())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Geometry derived from this config.
    pub fn layout(&self) -> ShmResult<RingLayout> {
        RingLayout::new(self.size, self.record_start, self.min_chunk)
    }

    /// Segment file name, e.g. `synth_samples`.
    pub fn segment_name(&self) -> String {
        format!("{SEGMENT_PREFIX}{}", self.name)
    }

    /// Full path of the segment file.
    pub fn segment_path(&self) -> PathBuf {
        self.shm_dir.join(self.segment_name())
    }

    /// POSIX semaphore name of the buffer gate.
    pub fn gate_name(&self) -> String {
        format!("/{SEGMENT_PREFIX}{}_gate", self.name)
    }

    /// Environment a child process needs to find this ring.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_RING_NAME, self.name.clone()),
            (ENV_RING_DIR, self.shm_dir.display().to_string()),
            (ENV_RING_SIZE, self.size.to_string()),
            (ENV_RING_RECORD_START, self.record_start.to_string()),
            (ENV_RING_MIN_CHUNK, self.min_chunk.to_string()),
        ]
    }

    /// Read the ring config from the process environment, defaulting unset
    /// variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_RING_NAME) {
            config.name = name;
        }
        if let Some(dir) = lookup(ENV_RING_DIR) {
            config.shm_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup(ENV_RING_SIZE) {
            config.size = parse_env_usize(ENV_RING_SIZE, &size)?;
        }
        if let Some(start) = lookup(ENV_RING_RECORD_START) {
            config.record_start = parse_env_usize(ENV_RING_RECORD_START, &start)?;
        }
        if let Some(chunk) = lookup(ENV_RING_MIN_CHUNK) {
            config.min_chunk = parse_env_usize(ENV_RING_MIN_CHUNK, &chunk)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_env_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}='{value}' is not a byte count")))
}
