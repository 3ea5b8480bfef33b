//! # Synth Orchestrator
//!
//! Runs the buffer initializer, starts the producer processes and consumes
//! their samples from the shared ring in-process.
//!
//! - [`config`] - `SynthConfig` and its TOML sections
//! - [`process_group`] - `Supervisor` implementation over child processes
//! - [`orchestrator`] - lifecycle state machine and the sample API
//! - [`error`] - `SynthError`
//!
//! ```rust,no_run
//! use synth::{Orchestrator, SynthConfig};
//! use std::path::Path;
//!
//! let config = SynthConfig::load_from(Path::new("config/synth.toml"))?;
//! config.validate()?;
//!
//! let mut orchestrator = Orchestrator::new(config);
//! orchestrator.start()?;
//! for sample in orchestrator.samples().take(100) {
//!     let sample = sample?;
//!     println!("{}x{} {}", sample.height, sample.width, sample.caption);
//! }
//! orchestrator.shutdown()?;
//! # Ok::<(), synth::SynthError>(())
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod process_group;

pub use config::SynthConfig;
pub use error::SynthError;
pub use orchestrator::{Orchestrator, OrchestratorState, Samples};
pub use process_group::ProcessGroup;
