//! # Supervisor Contract
//!
//! Defines the process-group contract used by the orchestrator: run the
//! buffer initializer to completion, start detached producers, query their
//! liveness and tear everything down.
//!
//! The trait captures the operations the orchestrator relies on without
//! mandating how processes are started (fork/exec, a test double, ...).

use nix::sys::signal::Signal;
use std::path::Path;

/// Role of a child inside the process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildRole {
    /// One-shot buffer initializer (`synth_base`).
    Initializer,
    /// Sample producer (`synth_producer`), numbered in spawn order.
    Producer(usize),
}

/// Liveness reported by [`Supervisor::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Process is still running.
    Running,
    /// Process has exited.
    Exited {
        /// Exit code if the process exited normally.
        exit_code: Option<i32>,
    },
    /// PID is not tracked by this supervisor.
    Unknown,
}

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Failed to start the requested process.
    #[error("failed to spawn {role:?}: {reason}")]
    SpawnFailed {
        role: ChildRole,
        reason: String,
    },

    /// Initializer ran but did not exit cleanly.
    #[error("initializer exited with {status}")]
    InitFailed {
        status: String,
    },

    /// Delivering a signal to a child failed.
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    /// Generic I/O or system error.
    #[error("supervisor error: {0}")]
    Other(String),
}

/// Supervisor contract for the synth process group.
///
/// # Example
///
/// ```rust,ignore
/// struct ProcessGroup { /* ... */ }
///
/// impl Supervisor for ProcessGroup {
///     fn run_initializer(&mut self, program: &Path) -> Result<(), SupervisorError> { /* ... */ }
///     fn spawn_producer(&mut self, program: &Path, config: &Path)
///         -> Result<u32, SupervisorError> { /* ... */ }
///     fn health_check(&mut self, pid: u32) -> HealthStatus { /* ... */ }
///     fn shutdown_all(&mut self) -> Result<(), SupervisorError> { /* ... */ }
/// }
/// ```
pub trait Supervisor {
    /// Run the initializer with no arguments and block until it exits.
    ///
    /// A spawn failure or a non-zero exit status is an error: nothing
    /// downstream can proceed without the shared region.
    fn run_initializer(&mut self, program: &Path) -> Result<(), SupervisorError>;

    /// Start one detached producer with exactly one argument, its config path.
    ///
    /// Returns the OS PID. The child must receive a termination signal if
    /// the supervising process dies first.
    fn spawn_producer(&mut self, program: &Path, config: &Path) -> Result<u32, SupervisorError>;

    /// Query the liveness of a tracked child.
    fn health_check(&mut self, pid: u32) -> HealthStatus;

    /// Terminate every tracked child and reap it.
    ///
    /// Expected sequence:
    /// 1. Send SIGTERM to each producer.
    /// 2. Wait up to a grace period for each to exit.
    /// 3. Escalate to SIGKILL for unresponsive processes.
    fn shutdown_all(&mut self) -> Result<(), SupervisorError>;
}

/// Ask the kernel to deliver `signal` to the calling process when its parent
/// dies.
///
/// Only performs a raw `prctl`, so it is safe to call between fork and exec.
#[cfg(target_os = "linux")]
pub fn die_with_parent(signal: Signal) -> nix::Result<()> {
    nix::sys::prctl::set_pdeathsig(signal)
}

/// Parent-death signals are Linux only; elsewhere this is a no-op.
#[cfg(not(target_os = "linux"))]
pub fn die_with_parent(_signal: Signal) -> nix::Result<()> {
    Ok(())
}

/// True when the process has been re-parented to init, i.e. its original
/// parent is already gone.
pub fn orphaned() -> bool {
    nix::unistd::getppid().as_raw() == 1
}
