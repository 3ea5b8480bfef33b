//! Admission policies that keep producers from lapping the consumer

use crate::layout::RingLayout;
use crate::producer::Claim;

/// Decides whether a planned claim may be taken now.
///
/// `consume_cursor` is the raw published cursor position (0 when unset).
pub trait Backpressure: Send {
    /// `true` to take the claim, `false` to back off and re-plan.
    fn admit(&self, layout: &RingLayout, claim: &Claim, consume_cursor: u64) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Never holds. Producers may overwrite records the consumer has not read.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl Backpressure for Unbounded {
    fn admit(&self, _layout: &RingLayout, _claim: &Claim, _consume_cursor: u64) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "unbounded"
    }
}

/// Holds a producer whose claim would reach unread records.
///
/// Cursors are ring positions compared after [`RingLayout::canonical`], so
/// a full ring and a drained one never look alike. With consume position
/// `c`, a claim is admitted when
///
/// - the produce cursor canonicalizes to `c`: everything published was
///   read, and [`RingLayout::max_record_len`] keeps even a wrapped claim off
///   the sentinel the consumer is about to read;
/// - otherwise, the claim ends `margin` bytes before `c` one lap later.
///   Those bytes were read during the consumer's current lap.
#[derive(Debug, Clone, Copy)]
pub struct LapGuard {
    margin: u64,
}

impl LapGuard {
    /// Guard with the given safety margin, raised to at least one word.
    pub fn new(margin: u64) -> Self {
        Self {
            margin: margin.max(synth_common::consts::RECORD_ALIGN as u64),
        }
    }

    /// Margin in bytes.
    pub fn margin(&self) -> u64 {
        self.margin
    }
}

impl Backpressure for LapGuard {
    fn admit(&self, layout: &RingLayout, claim: &Claim, consume_cursor: u64) -> bool {
        let c = layout.canonical(consume_cursor);
        if layout.canonical(claim.observed) == c {
            return true;
        }
        claim.end().saturating_add(self.margin) <= c.saturating_add(layout.size())
    }

    fn name(&self) -> &'static str {
        "lap-guard"
    }
}
