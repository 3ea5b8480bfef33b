//! # Synth Sample Ring
//!
//! Multi-producer, single-consumer ring of labeled image samples living in a
//! shared memory segment. Producers are separate processes; the consumer is
//! embedded in the orchestrator. No kernel channel carries the data: records
//! are framed in place and published by a marker word written last.
//!
//! ## Region Layout
//!
//! ```text
//! 0        8              16             24        record_start          size
//! ┌────────┬──────────────┬──────────────┬─────────┬──────────────────────┐
//! │ state  │ consume cur. │ produce cur. │ reserved│ records ...          │
//! └────────┴──────────────┴──────────────┴─────────┴──────────────────────┘
//! ```
//!
//! - `state` is `RING_READY` once the initializer finished the header. Word
//!   0 is not a record slot; the record area starts at `record_start`.
//! - Both cursors hold ring positions, `lap * size + offset`, that only grow.
//! - The consume cursor is advisory: producers read it for backpressure.
//! - Producers claim slots by compare-and-swap on the produce cursor.
//!
//! ## Usage
//!
//! ```rust
//! use synth_ring::{Consumer, LapGuard, RingConfig, RingProducer, RingRegion, Sample, Spin};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let dir = tempfile::tempdir()?;
//! let config = RingConfig {
//!     name: "doc".into(),
//!     size: 64 * 1024,
//!     # shm_dir: dir.path().to_path_buf(),
//!     ..RingConfig::default()
//! };
//! let _base = RingRegion::create(&config)?;
//!
//! let guard = LapGuard::new(config.min_chunk as u64);
//! let mut producer = RingProducer::attach(&config, Box::new(guard), Box::new(Spin))?;
//! let mut consumer = Consumer::attach(&config, Box::new(Spin))?;
//!
//! producer.publish(&Sample::new(32, "cat", vec![0; 320])?)?;
//! let sample = consumer.poll_blocking()?;
//! assert_eq!(sample.width, 10);
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod consumer;
pub mod error;
pub mod gate;
pub mod layout;
pub mod platform;
pub mod poll;
pub mod producer;
pub mod record;
pub mod region;

pub use backpressure::{Backpressure, LapGuard, Unbounded};
pub use consumer::{Consumer, ConsumerStats};
pub use error::{ShmError, ShmResult};
pub use gate::BufferGate;
pub use layout::{RingConfig, RingLayout, align_up, record_len};
pub use poll::{ExponentialBackoff, PollMode, PollStrategy, Spin, Yield};
pub use producer::{Claim, ProducerStats, RingProducer, plan_claim};
pub use record::{Caption, DecodedRecord, Marker, Sample};
pub use region::RingRegion;

use synth_common::config::LogLevel;

/// Install the global tracing subscriber.
///
/// Output goes to stderr. `RUST_LOG` directives win over `level`. Calling
/// this twice is harmless; the second subscriber is dropped.
pub fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::EnvFilter;

    let level: tracing::Level = level.into();
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
