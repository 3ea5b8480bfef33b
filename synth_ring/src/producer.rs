//! Reference ring writer and the slot-claiming rules every producer follows
//!
//! A producer claims `[start, start + len)` by moving the shared produce
//! cursor with compare-and-swap, then fills the slot and publishes it with
//! the marker-last store. Claims that do not fit before the end restart at
//! `record_start` of the next lap; when the consumer could not infer that on
//! its own, the abandoned offset gets a `NO_SPACE_TO_PRODUCE` sentinel.
//!
//! Claim positions are ring positions (see [`crate::layout`]); only
//! [`Claim::offset`] and the sentinel are byte offsets into the region.

use crate::backpressure::Backpressure;
use crate::error::{ShmError, ShmResult};
use crate::gate::BufferGate;
use crate::layout::{RingConfig, RingLayout};
use crate::poll::PollStrategy;
use crate::record::{Sample, encode_at, plant_wrap_sentinel};
use crate::region::RingRegion;
use synth_common::consts::{NOT_PRODUCED, RECORD_ALIGN, WORD_SIZE};
use tracing::{debug, trace};

/// A planned slot claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Produce cursor the plan was made from (CAS expected value)
    pub observed: u64,
    /// Ring position of the slot
    pub start: u64,
    /// Byte offset of the slot in the region
    pub offset: u64,
    /// Encoded record length
    pub len: u64,
    /// Claim restarts at `record_start` of the next lap
    pub wrapped: bool,
    /// Offset that must carry a wrap sentinel once the claim is taken
    pub sentinel: Option<u64>,
}

impl Claim {
    /// Produce cursor after this claim.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Byte offset the record is written at.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the claim restarts at `record_start`.
    pub fn wrapped(&self) -> bool {
        self.wrapped
    }
}

/// Plan where a record of `len` bytes goes given the produce cursor position.
///
/// Records always end strictly before the region end. A cursor inside the
/// wrap zone restarts silently (the consumer wraps there by itself); a
/// cursor before the zone whose record would overrun restarts and leaves a
/// sentinel at the cursor.
///
/// # Errors
///
/// `RecordTooLarge` past [`RingLayout::max_record_len`], `ProtocolViolation`
/// for a misaligned cursor or one so large the next lap cannot be numbered.
pub fn plan_claim(layout: &RingLayout, produce_cursor: u64, len: u64) -> ShmResult<Claim> {
    if len == 0 || len % RECORD_ALIGN as u64 != 0 {
        return Err(ShmError::InvalidSample {
            reason: format!("record length {len} is not a positive multiple of {RECORD_ALIGN}"),
        });
    }
    if len > layout.max_record_len() {
        return Err(ShmError::RecordTooLarge {
            len,
            capacity: layout.max_record_len(),
        });
    }
    if produce_cursor % RECORD_ALIGN as u64 != 0 {
        return Err(ShmError::ProtocolViolation {
            reason: format!("produce cursor {produce_cursor} is not a record position"),
        });
    }
    if produce_cursor.checked_add(2 * layout.size()).is_none() {
        return Err(ShmError::ProtocolViolation {
            reason: format!("produce cursor {produce_cursor} leaves no room for another lap"),
        });
    }

    let lap = layout.lap_of(produce_cursor);
    let offset = layout.offset_of(produce_cursor).max(layout.record_start());
    let in_wrap_zone = layout.in_wrap_zone(offset);
    let overruns = offset + len >= layout.size();

    if !in_wrap_zone && !overruns {
        return Ok(Claim {
            observed: produce_cursor,
            start: layout.position(lap, offset),
            offset,
            len,
            wrapped: false,
            sentinel: None,
        });
    }

    let sentinel = (!in_wrap_zone && offset + WORD_SIZE as u64 <= layout.size()).then_some(offset);
    Ok(Claim {
        observed: produce_cursor,
        start: layout.position(lap + 1, layout.record_start()),
        offset: layout.record_start(),
        len,
        wrapped: true,
        sentinel,
    })
}

/// Per-producer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Records published
    pub published: u64,
    /// Publishes that had to wait for the consumer
    pub holds: u64,
    /// Claims lost to another producer and re-planned
    pub contended: u64,
    /// Claims that restarted at `record_start`
    pub wraps: u64,
}

/// Writes samples into the ring.
pub struct RingProducer {
    region: RingRegion,
    layout: RingLayout,
    backpressure: Box<dyn Backpressure>,
    strategy: Box<dyn PollStrategy>,
    gate: Option<BufferGate>,
    stats: ProducerStats,
}

impl RingProducer {
    /// Attach to the ring described by `config`.
    pub fn attach(
        config: &RingConfig,
        backpressure: Box<dyn Backpressure>,
        strategy: Box<dyn PollStrategy>,
    ) -> ShmResult<Self> {
        let layout = config.layout()?;
        let region = RingRegion::attach(config)?;
        Ok(Self::new(region, layout, backpressure, strategy))
    }

    /// Producer over an already mapped region.
    pub fn new(
        region: RingRegion,
        layout: RingLayout,
        backpressure: Box<dyn Backpressure>,
        strategy: Box<dyn PollStrategy>,
    ) -> Self {
        debug!(
            "Producer on ring '{}' with {} backpressure, {} polling",
            region.name(),
            backpressure.name(),
            strategy.name()
        );
        Self {
            region,
            layout,
            backpressure,
            strategy,
            gate: None,
            stats: ProducerStats::default(),
        }
    }

    /// Pass through `gate` before every claim.
    pub fn with_gate(mut self, gate: BufferGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Publish one sample; returns the offset it was written at.
    ///
    /// Blocks while the gate is closed or backpressure holds the claim.
    pub fn publish(&mut self, sample: &Sample) -> ShmResult<u64> {
        if sample.height == 0 {
            return Err(ShmError::InvalidSample {
                reason: "height must be positive".to_string(),
            });
        }
        if let Some(gate) = &self.gate {
            gate.pass()?;
        }

        let len = sample.encoded_len();
        let mut attempt = 0u32;
        loop {
            let observed = self.region.produce_cursor()?;
            let claim = plan_claim(&self.layout, observed, len)?;

            let consumed = self.region.consume_cursor()?;
            if !self.backpressure.admit(&self.layout, &claim, consumed) {
                if attempt == 0 {
                    self.stats.holds += 1;
                    debug!(
                        "Held by {}: claim {}..{} vs consume cursor {}",
                        self.backpressure.name(),
                        claim.start,
                        claim.end(),
                        consumed
                    );
                }
                self.strategy.idle(attempt);
                attempt = attempt.saturating_add(1);
                continue;
            }

            if self
                .region
                .cas_produce_cursor(claim.observed, claim.end())?
                .is_err()
            {
                self.stats.contended += 1;
                continue;
            }

            if claim.wrapped {
                self.stats.wraps += 1;
                if let Some(at) = claim.sentinel {
                    plant_wrap_sentinel(&self.region, at)?;
                }
                trace!("Wrapped from {} to {}", claim.observed, claim.start);
            }

            self.region.store_word(claim.offset(), NOT_PRODUCED)?;
            encode_at(&self.region, claim.offset(), sample)?;
            self.stats.published += 1;
            return Ok(claim.offset());
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Ring geometry.
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// The mapped region.
    pub fn region(&self) -> &RingRegion {
        &self.region
    }
}
