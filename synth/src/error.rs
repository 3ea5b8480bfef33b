//! Orchestrator errors

use crate::orchestrator::OrchestratorState;
use synth_common::config::ConfigError;
use synth_common::supervisor::SupervisorError;
use synth_ring::ShmError;
use thiserror::Error;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum SynthError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// Ring operation failed
    #[error("ring: {0}")]
    Ring(#[from] ShmError),

    /// Process group operation failed
    #[error("supervisor: {0}")]
    Supervisor(#[from] SupervisorError),

    /// The initializer could not be started or exited non-zero
    #[error("buffer initialization failed: {0}")]
    InitFailed(#[source] SupervisorError),

    /// Every producer spawn failed
    #[error("none of {requested} producers could be started")]
    NoProducers { requested: usize },

    /// Operation called in the wrong lifecycle phase
    #[error("{operation} needs state {expected:?}, orchestrator is {actual:?}")]
    InvalidState {
        operation: &'static str,
        expected: OrchestratorState,
        actual: OrchestratorState,
    },
}

impl SynthError {
    /// Whether the ring can no longer be read.
    pub fn is_fatal(&self) -> bool {
        match self {
            SynthError::Ring(e) => e.is_fatal(),
            SynthError::InvalidState { .. } => false,
            _ => true,
        }
    }
}
