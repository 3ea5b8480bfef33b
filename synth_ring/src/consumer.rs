//! The single ring consumer
//!
//! The consumer walks the record chain from `record_start`, copying out
//! each published record, retiring it and publishing its ring position
//! (lap and offset) for the producers' backpressure. It never writes
//! anything but markers and the consume cursor.

use crate::error::{ShmError, ShmResult};
use crate::layout::{RingConfig, RingLayout};
use crate::poll::PollStrategy;
use crate::record::{Sample, decode_at, mark_consumed, retire_wrap_sentinel};
use crate::region::RingRegion;
use std::time::{Duration, Instant};
use synth_common::consts::NO_SPACE_TO_PRODUCE;
use tracing::{trace, warn};

/// Consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Records delivered, malformed ones included
    pub samples: u64,
    /// Records delivered with the malformed flag
    pub malformed: u64,
    /// Times the cursor restarted at `record_start`
    pub wraps: u64,
    /// Polls that found nothing ready
    pub empty_polls: u64,
    /// Payload bytes copied out
    pub bytes: u64,
}

/// Reads samples out of the ring in record order.
pub struct Consumer {
    region: RingRegion,
    layout: RingLayout,
    strategy: Box<dyn PollStrategy>,
    cursor: u64,
    lap: u64,
    stats: ConsumerStats,
}

impl Consumer {
    /// Attach to the ring described by `config`.
    pub fn attach(config: &RingConfig, strategy: Box<dyn PollStrategy>) -> ShmResult<Self> {
        let layout = config.layout()?;
        let region = RingRegion::attach(config)?;
        Ok(Self::new(region, layout, strategy))
    }

    /// Consumer over an already mapped region, starting at `record_start`.
    pub fn new(region: RingRegion, layout: RingLayout, strategy: Box<dyn PollStrategy>) -> Self {
        Self {
            cursor: layout.record_start(),
            lap: 0,
            region,
            layout,
            strategy,
            stats: ConsumerStats::default(),
        }
    }

    /// Take the next ready record, if any.
    ///
    /// `Ok(None)` leaves the cursor where it was. Errors for which
    /// [`ShmError::is_fatal`] holds mean the region can no longer be trusted.
    pub fn try_next(&mut self) -> ShmResult<Option<Sample>> {
        let mut offset = self.cursor;
        let marker = if offset < self.layout.record_start() {
            0
        } else {
            self.region.load_word(offset)?
        };

        if self.layout.should_wrap(offset, marker) {
            if marker == NO_SPACE_TO_PRODUCE {
                retire_wrap_sentinel(&self.region, offset)?;
            }
            offset = self.layout.record_start();
            self.cursor = offset;
            self.lap += 1;
            trace!("Consumer wraps into lap {}", self.lap);
            self.region.publish_consume_cursor(self.position())?;
            self.stats.wraps += 1;
        }

        let Some(record) = decode_at(&self.region, offset)? else {
            self.stats.empty_polls += 1;
            return Ok(None);
        };

        mark_consumed(&self.region, offset)?;
        if record.next_offset >= self.layout.size() {
            return Err(ShmError::ProtocolViolation {
                reason: format!(
                    "record at {offset} ends at {} past region of {} bytes",
                    record.next_offset,
                    self.layout.size()
                ),
            });
        }
        self.cursor = record.next_offset;
        self.region.publish_consume_cursor(self.position())?;

        let sample = record.sample;
        self.stats.samples += 1;
        self.stats.bytes += sample.image.len() as u64;
        if sample.malformed {
            self.stats.malformed += 1;
            warn!(
                "Malformed record at {offset}: height {} with {} bytes, caption '{}'",
                sample.height,
                sample.image.len(),
                sample.caption
            );
        }
        Ok(Some(sample))
    }

    /// Wait for the next record.
    pub fn poll_blocking(&mut self) -> ShmResult<Sample> {
        let mut attempt = 0u32;
        loop {
            if let Some(sample) = self.try_next()? {
                return Ok(sample);
            }
            self.strategy.idle(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Wait up to `timeout` for the next record.
    pub fn poll_timeout(&mut self, timeout: Duration) -> ShmResult<Option<Sample>> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;
        loop {
            if let Some(sample) = self.try_next()? {
                return Ok(Some(sample));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.strategy.idle(attempt);
            attempt = attempt.saturating_add(1);
        }
    }

    /// Offset of the next record to read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Ring position of the next record to read, as published to producers.
    pub fn position(&self) -> u64 {
        self.layout.position(self.lap, self.cursor)
    }

    /// Counters so far.
    pub fn stats(&self) -> ConsumerStats {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::Spin;
    use crate::record::{encode_at, plant_wrap_sentinel};
    use synth_common::consts::{ALREADY_CONSUMED, SHOULD_CONSUME};

    fn consumer() -> Consumer {
        let layout = RingLayout::new(4096, 64, 128).unwrap();
        let region = RingRegion::anonymous(&layout).unwrap();
        Consumer::new(region, layout, Box::new(Spin))
    }

    #[test]
    fn test_empty_ring_yields_nothing() {
        let mut consumer = consumer();
        assert!(consumer.try_next().unwrap().is_none());
        assert_eq!(consumer.cursor(), 64);
        assert_eq!(consumer.stats().empty_polls, 1);
    }

    #[test]
    fn test_unset_global_cursor_reads_nothing() {
        let mut consumer = consumer();
        consumer.region().publish_consume_cursor(0).unwrap();
        assert!(consumer.try_next().unwrap().is_none());
        assert_eq!(consumer.cursor(), 64);
    }

    #[test]
    fn test_consume_publishes_cursor_and_marks() {
        let mut consumer = consumer();
        let sample = Sample::new(32, "cat", vec![3; 320]).unwrap();
        encode_at(consumer.region(), 64, &sample).unwrap();

        let got = consumer.try_next().unwrap().unwrap();
        assert_eq!(got.width, 10);
        assert_eq!(got.caption.as_str(), "cat");
        assert_eq!(consumer.cursor(), 472);
        assert_eq!(consumer.region().consume_cursor().unwrap(), 472);
        assert_eq!(consumer.region().load_word(64).unwrap(), ALREADY_CONSUMED);
        assert!(consumer.try_next().unwrap().is_none());
        assert_eq!(consumer.stats().samples, 1);
        assert_eq!(consumer.stats().bytes, 320);
    }

    #[test]
    fn test_sentinel_wrap_is_retired() {
        let mut consumer = consumer();
        let sample = Sample::new(1, "a", vec![0; 8]).unwrap();
        let next = encode_at(consumer.region(), 64, &sample).unwrap();
        consumer.try_next().unwrap().unwrap();
        assert_eq!(consumer.cursor(), next);

        plant_wrap_sentinel(consumer.region(), next).unwrap();
        encode_at(consumer.region(), 64, &sample).unwrap();

        assert!(consumer.try_next().unwrap().is_some());
        assert_eq!(consumer.stats().wraps, 1);
        assert_eq!(consumer.region().load_word(next).unwrap(), ALREADY_CONSUMED);
        assert_eq!(consumer.position(), 4096 + next);
        assert_eq!(consumer.region().consume_cursor().unwrap(), 4096 + next);
    }

    #[test]
    fn test_wrap_zone_restarts_without_sentinel() {
        let mut consumer = consumer();
        consumer.cursor = 3968;
        assert!(consumer.try_next().unwrap().is_none());
        assert_eq!(consumer.cursor(), 64);
        assert_eq!(consumer.position(), 4096 + 64);
        assert_eq!(consumer.region().consume_cursor().unwrap(), 4096 + 64);
    }

    #[test]
    fn test_published_position_keeps_counting_laps() {
        let mut consumer = consumer();
        consumer.lap = 7;
        let sample = Sample::new(1, "a", vec![0; 8]).unwrap();
        let next = encode_at(consumer.region(), 64, &sample).unwrap();

        consumer.try_next().unwrap().unwrap();
        assert_eq!(consumer.cursor(), next);
        assert_eq!(consumer.region().consume_cursor().unwrap(), 7 * 4096 + next);
    }

    #[test]
    fn test_record_reaching_region_end_is_fatal() {
        let mut consumer = consumer();
        // Record at 3960 claiming 48 payload bytes ends at exactly 4096
        consumer.cursor = 3960;
        consumer.region().write_from(3968, &1u64.to_ne_bytes()).unwrap();
        consumer.region().write_from(3960 + 80, &48u64.to_ne_bytes()).unwrap();
        consumer.region().store_word(3960, SHOULD_CONSUME).unwrap();

        let err = consumer.try_next().unwrap_err();
        assert!(matches!(err, ShmError::ProtocolViolation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_poll_timeout_expires() {
        let mut consumer = consumer();
        let got = consumer.poll_timeout(Duration::from_millis(5)).unwrap();
        assert!(got.is_none());
        assert!(consumer.stats().empty_polls >= 1);
    }

    #[test]
    fn test_malformed_counted() {
        let mut consumer = consumer();
        consumer.region().write_from(72, &3u64.to_ne_bytes()).unwrap();
        consumer.region().write_from(144, &10u64.to_ne_bytes()).unwrap();
        consumer.region().store_word(64, SHOULD_CONSUME).unwrap();

        let got = consumer.try_next().unwrap().unwrap();
        assert!(got.malformed);
        assert_eq!(got.width, 3);
        assert_eq!(consumer.stats().malformed, 1);
        assert_eq!(consumer.cursor(), 64 + 104);
    }
}
