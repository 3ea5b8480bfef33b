//! What to do between empty polls
//!
//! Both sides of the ring wait the same way: the consumer when nothing is
//! ready, a producer while backpressure holds it. `attempt` counts the
//! consecutive idle rounds and resets after progress.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Idle policy between unproductive polls.
pub trait PollStrategy: Send {
    /// Wait before the next poll.
    fn idle(&self, attempt: u32);

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Busy-wait with the CPU spin hint. Lowest latency, burns a core.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spin;

impl PollStrategy for Spin {
    fn idle(&self, _attempt: u32) {
        std::hint::spin_loop();
    }

    fn name(&self) -> &'static str {
        "spin"
    }
}

/// Give the time slice back to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Yield;

impl PollStrategy for Yield {
    fn idle(&self, _attempt: u32) {
        std::thread::yield_now();
    }

    fn name(&self) -> &'static str {
        "yield"
    }
}

/// Sleep `min * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// First sleep
    pub min: Duration,
    /// Longest sleep
    pub max: Duration,
}

impl ExponentialBackoff {
    /// Backoff between `min` and `max`; `max` is raised to `min` if smaller.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Sleep duration for the given idle round.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.min.saturating_mul(factor).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_micros(10), Duration::from_millis(1))
    }
}

impl PollStrategy for ExponentialBackoff {
    fn idle(&self, attempt: u32) {
        std::thread::sleep(self.delay(attempt));
    }

    fn name(&self) -> &'static str {
        "backoff"
    }
}

/// Strategy selector as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// [`Spin`]
    Spin,
    /// [`Yield`]
    Yield,
    /// [`ExponentialBackoff`]
    #[default]
    Backoff,
}

impl PollMode {
    /// Build the strategy; the durations only matter for `Backoff`.
    pub fn build(self, min: Duration, max: Duration) -> Box<dyn PollStrategy> {
        match self {
            PollMode::Spin => Box::new(Spin),
            PollMode::Yield => Box::new(Yield),
            PollMode::Backoff => Box::new(ExponentialBackoff::new(min, max)),
        }
    }
}
