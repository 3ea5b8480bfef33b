//! Ring protocol tests over file-backed segments, one mapping per participant

use std::sync::{Arc, Mutex};
use std::thread;
use synth_common::consts::{ALREADY_CONSUMED, NO_SPACE_TO_PRODUCE, SHOULD_CONSUME};
use synth_ring::{
    Consumer, LapGuard, PollStrategy, RingConfig, RingProducer, RingRegion, Sample, ShmError,
    ShmResult, Spin, Unbounded, Yield,
};
use tempfile::TempDir;

fn ring(dir: &TempDir, name: &str, size: usize, min_chunk: usize) -> ShmResult<(RingConfig, RingRegion)> {
    let config = RingConfig {
        name: name.to_string(),
        shm_dir: dir.path().to_path_buf(),
        size,
        record_start: 64,
        min_chunk,
    };
    let base = RingRegion::create(&config)?;
    Ok((config, base))
}

fn guarded_producer(config: &RingConfig) -> ShmResult<RingProducer> {
    RingProducer::attach(
        config,
        Box::new(LapGuard::new(config.min_chunk as u64)),
        Box::new(Yield),
    )
}

/// 8x8 image whose first bytes carry `seq`
fn numbered(caption: &str, seq: u64) -> Sample {
    let mut image = vec![0u8; 64];
    image[..8].copy_from_slice(&seq.to_le_bytes());
    Sample::new(8, caption, image).unwrap()
}

fn seq_of(sample: &Sample) -> u64 {
    u64::from_le_bytes(sample.image[..8].try_into().unwrap())
}

/// Reads one record each time the producer idles, recording its sequence
struct DrainOnHold {
    consumer: Arc<Mutex<Consumer>>,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl PollStrategy for DrainOnHold {
    fn idle(&self, _attempt: u32) {
        let mut consumer = self.consumer.lock().unwrap();
        if let Some(sample) = consumer.try_next().unwrap() {
            self.seen.lock().unwrap().push(seq_of(&sample));
        }
    }

    fn name(&self) -> &'static str {
        "drain-on-hold"
    }
}

#[test]
fn test_cat_sample_end_to_end() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, base) = ring(&dir, "cat", 65536, 1024)?;
    let mut producer = guarded_producer(&config)?;
    let mut consumer = Consumer::attach(&config, Box::new(Spin))?;

    let offset = producer.publish(&Sample::new(32, "cat", vec![0x80; 320])?)?;
    assert_eq!(offset, 64);
    assert_eq!(base.load_word(64)?, SHOULD_CONSUME);

    let sample = consumer.try_next()?.expect("record ready");
    assert_eq!(sample.height, 32);
    assert_eq!(sample.width, 10);
    assert_eq!(sample.caption.as_str(), "cat");
    assert_eq!(sample.image.len(), 320);
    assert!(!sample.malformed);
    assert_eq!(base.load_word(64)?, ALREADY_CONSUMED);
    assert_eq!(base.consume_cursor()?, 64 + 408);
    Ok(())
}

#[test]
fn test_records_arrive_in_marker_order_then_nothing() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, _base) = ring(&dir, "order", 65536, 1024)?;
    let mut producer = guarded_producer(&config)?;
    let mut consumer = Consumer::attach(&config, Box::new(Spin))?;

    for seq in 0..20 {
        producer.publish(&numbered(&format!("s{seq}"), seq))?;
    }

    for seq in 0..20 {
        let sample = consumer.try_next()?.expect("record ready");
        assert_eq!(seq_of(&sample), seq);
        assert_eq!(sample.caption.as_str(), format!("s{seq}"));
    }
    assert!(consumer.try_next()?.is_none());
    assert!(consumer.try_next()?.is_none());
    assert_eq!(consumer.stats().samples, 20);
    Ok(())
}

#[test]
fn test_fresh_region_with_unset_cursor_has_nothing() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, base) = ring(&dir, "fresh", 8192, 256)?;
    base.publish_consume_cursor(0)?;

    let mut consumer = Consumer::attach(&config, Box::new(Spin))?;
    assert!(consumer.try_next()?.is_none());
    assert_eq!(consumer.cursor(), 64);
    Ok(())
}

#[test]
fn test_wrap_sentinel_resets_to_record_start() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, base) = ring(&dir, "wrap", 8192, 256)?;
    let mut producer = guarded_producer(&config)?;
    let mut consumer = Consumer::attach(&config, Box::new(Spin))?;

    // 1000-byte records: 1088 each, seven fit before the tail
    let big = |seq: u64| {
        let mut image = vec![0u8; 1000];
        image[..8].copy_from_slice(&seq.to_le_bytes());
        Sample::new(10, "big", image).unwrap()
    };

    for seq in 0..7 {
        producer.publish(&big(seq))?;
        assert_eq!(seq_of(&consumer.try_next()?.expect("ready")), seq);
    }
    let tail = consumer.cursor();
    assert_eq!(tail, 64 + 7 * 1088);

    let offset = producer.publish(&big(7))?;
    assert_eq!(offset, 64);
    assert_eq!(base.load_word(tail)?, NO_SPACE_TO_PRODUCE);
    // Cursors count laps rather than restarting
    assert_eq!(base.produce_cursor()?, 8192 + 64 + 1088);

    let sample = consumer.try_next()?.expect("wrapped record");
    assert_eq!(seq_of(&sample), 7);
    assert_eq!(consumer.stats().wraps, 1);
    assert_eq!(base.consume_cursor()?, 8192 + 64 + 1088);
    // The sentinel does not survive into the next lap
    assert_eq!(base.load_word(tail)?, ALREADY_CONSUMED);
    Ok(())
}

#[test]
fn test_full_ring_holds_until_consumer_reads() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, base) = ring(&dir, "full", 8192, 256)?;
    let consumer = Arc::new(Mutex::new(Consumer::attach(&config, Box::new(Spin))?));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut producer = RingProducer::attach(
        &config,
        Box::new(LapGuard::new(256)),
        Box::new(DrainOnHold {
            consumer: Arc::clone(&consumer),
            seen: Arc::clone(&seen),
        }),
    )?;

    // 152-byte records: 52 fill lap 0 and leave the cursor in the wrap zone
    for seq in 0..52 {
        producer.publish(&numbered("full", seq))?;
    }
    assert_eq!(base.produce_cursor()?, 64 + 52 * 152);
    assert_eq!(producer.stats().holds, 0);
    assert!(seen.lock().unwrap().is_empty());

    // Restarting at 64 would overwrite unread records; the claim needs
    // 64 + 152 + 256 = 472 read before it may proceed
    assert_eq!(producer.publish(&numbered("full", 52))?, 64);
    assert_eq!(producer.stats().holds, 1);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

    let mut consumer = consumer.lock().unwrap();
    for seq in 3..=52 {
        let sample = consumer.try_next()?.expect("record survived the hold");
        assert_eq!(seq_of(&sample), seq);
    }
    assert!(consumer.try_next()?.is_none());
    assert_eq!(consumer.stats().wraps, 1);
    Ok(())
}

#[test]
fn test_consumed_slots_never_resurface() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, _base) = ring(&dir, "resurface", 8192, 256)?;
    let mut producer = guarded_producer(&config)?;
    let mut consumer = Consumer::attach(&config, Box::new(Spin))?;

    producer.publish(&numbered("once", 1))?;
    assert!(consumer.try_next()?.is_some());
    for _ in 0..100 {
        assert!(consumer.try_next()?.is_none());
    }

    // A second consumer starting over sees only retired slots
    let mut late = Consumer::attach(&config, Box::new(Spin))?;
    assert!(late.try_next()?.is_none());
    Ok(())
}

#[test]
fn test_malformed_record_is_retired_and_flagged() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, base) = ring(&dir, "malformed", 8192, 256)?;
    let mut consumer = Consumer::attach(&config, Box::new(Spin))?;

    // height 7, 30 bytes: not a rectangle
    base.write_from(72, &7u64.to_ne_bytes())?;
    base.write_from(80, b"ragged\0")?;
    base.write_from(144, &30u64.to_ne_bytes())?;
    base.store_word(64, SHOULD_CONSUME)?;
    base.cas_produce_cursor(64, 64 + 120)?.ok();

    let sample = consumer.try_next()?.expect("malformed record delivered");
    assert!(sample.malformed);
    assert_eq!(sample.width, 4);
    assert_eq!(base.load_word(64)?, ALREADY_CONSUMED);
    assert_eq!(consumer.cursor(), 64 + 120);

    // The next well-formed record follows normally
    let mut producer = guarded_producer(&config)?;
    producer.publish(&numbered("after", 9))?;
    let next = consumer.try_next()?.expect("next record");
    assert!(!next.malformed);
    assert_eq!(seq_of(&next), 9);
    Ok(())
}

#[test]
fn test_oversized_sample_is_rejected() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let (config, _base) = ring(&dir, "oversized", 4096, 256)?;
    let mut producer = RingProducer::attach(&config, Box::new(Unbounded), Box::new(Spin))?;

    let result = producer.publish(&Sample::new(1, "huge", vec![0; 8192])?);
    assert!(matches!(result, Err(ShmError::RecordTooLarge { .. })));
    Ok(())
}

#[test]
fn test_attach_before_initialization_fails() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let config = RingConfig {
        name: "absent".into(),
        shm_dir: dir.path().to_path_buf(),
        size: 8192,
        ..RingConfig::default()
    };
    assert!(matches!(
        Consumer::attach(&config, Box::new(Spin)),
        Err(ShmError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_concurrent_producers_lose_nothing() -> ShmResult<()> {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 500;

    let dir = tempfile::tempdir()?;
    // Small ring so producers wrap many times and backpressure engages
    let (config, _base) = ring(&dir, "concurrent", 16384, 512)?;

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let config = config.clone();
            thread::spawn(move || -> ShmResult<()> {
                let mut producer = guarded_producer(&config)?;
                for seq in 0..PER_PRODUCER {
                    producer.publish(&numbered(&format!("p{id}"), seq))?;
                }
                Ok(())
            })
        })
        .collect();

    let mut consumer = Consumer::attach(&config, Box::new(Yield))?;
    let mut next_seq = vec![0u64; PRODUCERS as usize];
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let sample = consumer.poll_blocking()?;
        assert!(!sample.malformed);
        let id: usize = sample.caption.as_str()[1..].parse().unwrap();
        // Each producer's records come out in the order it published them
        assert_eq!(seq_of(&sample), next_seq[id]);
        next_seq[id] += 1;
    }

    for handle in handles {
        handle.join().unwrap()?;
    }

    assert!(next_seq.iter().all(|&n| n == PER_PRODUCER));
    assert!(consumer.try_next()?.is_none());
    assert!(consumer.stats().wraps > 0);
    Ok(())
}
