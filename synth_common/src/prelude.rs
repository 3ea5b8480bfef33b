//! Prelude module for common re-exports.
//!
//! ```rust
//! use synth_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Record Layout ──────────────────────────────────────────────────
pub use crate::consts::{MAX_WORD_LENGTH, RECORD_HEADER_LEN};

// ─── Supervision ────────────────────────────────────────────────────
pub use crate::supervisor::{ChildRole, HealthStatus, Supervisor, SupervisorError};

/// Delay between producer launches; producers seed from the clock.
pub const DEFAULT_PRODUCER_STAGGER: Duration = Duration::from_secs(1);

/// Time a producer gets to exit after SIGTERM before SIGKILL.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
