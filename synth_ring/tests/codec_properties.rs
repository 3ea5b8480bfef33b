//! Property tests for the record codec and slot planning

use proptest::prelude::*;
use synth_ring::record::{decode_at, encode_at};
use synth_ring::{RingLayout, RingRegion, Sample, plan_claim, record_len};

proptest! {
    #[test]
    fn sample_survives_the_ring(
        height in 1u32..64,
        caption in "[a-z0-9 ]{0,63}",
        image in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let layout = RingLayout::new(16384, 64, 256).unwrap();
        let region = RingRegion::anonymous(&layout).unwrap();
        let sample = Sample::new(height, &caption, image.clone()).unwrap();

        let next = encode_at(&region, 64, &sample).unwrap();
        let decoded = decode_at(&region, 64).unwrap().unwrap();

        prop_assert_eq!(decoded.next_offset, next);
        prop_assert_eq!(decoded.sample.height, height);
        prop_assert_eq!(decoded.sample.caption.as_str(), caption.as_str());
        prop_assert_eq!(decoded.sample.width, image.len() / height as usize);
        prop_assert_eq!(decoded.sample.malformed, image.len() % height as usize != 0);
        prop_assert_eq!(decoded.sample.image, image);
    }

    #[test]
    fn claims_stay_inside_the_record_area(
        pages in 1usize..16,
        lap in 0u64..4,
        cursor_slot in 0u64..4096,
        payload in 0u64..8192,
    ) {
        let layout = RingLayout::new(pages * 4096 + 4096, 64, 512).unwrap();
        let offset = (cursor_slot * 8).min(layout.size() - 8);
        let cursor = layout.position(lap, offset);
        let len = record_len(payload);

        match plan_claim(&layout, cursor, len) {
            Ok(claim) => {
                prop_assert!(claim.offset() >= layout.record_start());
                prop_assert_eq!(claim.offset() % 8, 0);
                prop_assert_eq!(layout.offset_of(claim.start), claim.offset());
                prop_assert!(claim.start >= cursor);
                let expected_lap = if claim.wrapped() { lap + 1 } else { lap };
                prop_assert_eq!(layout.lap_of(claim.start), expected_lap);
                // Records end strictly before the region end
                prop_assert!(claim.offset() + claim.len < layout.size());
                // The consumer can always read the next marker there
                prop_assert!(!layout.should_wrap(claim.offset(), 0));
                if let Some(at) = claim.sentinel {
                    prop_assert!(claim.wrapped());
                    prop_assert!(!layout.should_wrap(at, 0));
                    // The restarted record leaves the sentinel intact
                    prop_assert!(claim.offset() + claim.len + layout.min_chunk() <= at);
                }
            }
            Err(_) => prop_assert!(len > layout.max_record_len()),
        }
    }
}
