//! Record codec: sample framing inside the ring
//!
//! ```text
//! +--------+--------+---------------------+--------+-------------+-----+
//! | marker | height | caption (64, NUL)   | size   | payload     | pad |
//! | 8      | 8      | 64                  | 8      | size bytes  | →8  |
//! +--------+--------+---------------------+--------+-------------+-----+
//! ```
//!
//! The marker is written last with release ordering; that store is the
//! publication step. Readers load it with acquire ordering before touching
//! any other field.

use crate::error::{ShmError, ShmResult};
use crate::layout::record_len;
use crate::region::RingRegion;
use synth_common::consts::{
    ALREADY_CONSUMED, CAPTION_FIELD_LEN, MAX_WORD_LENGTH, NO_SPACE_TO_PRODUCE, NOT_PRODUCED,
    RECORD_HEADER_LEN, SHOULD_CONSUME, WORD_SIZE,
};

const HEIGHT_OFFSET: u64 = WORD_SIZE as u64;
const CAPTION_OFFSET: u64 = HEIGHT_OFFSET + WORD_SIZE as u64;
const SIZE_OFFSET: u64 = CAPTION_OFFSET + CAPTION_FIELD_LEN as u64;
const PAYLOAD_OFFSET: u64 = RECORD_HEADER_LEN as u64;

/// Fixed-capacity caption text.
pub type Caption = heapless::String<MAX_WORD_LENGTH>;

/// Slot state as seen through its marker word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Never written
    NotProduced,
    /// Complete record waiting for the consumer
    ShouldConsume,
    /// Drained; may be overwritten
    AlreadyConsumed,
    /// Producer abandoned the tail; wrap
    NoSpaceToProduce,
    /// Payload bytes or garbage
    Unknown(u64),
}

impl Marker {
    /// Classify a raw marker word.
    pub fn from_word(word: u64) -> Self {
        match word {
            NOT_PRODUCED => Marker::NotProduced,
            SHOULD_CONSUME => Marker::ShouldConsume,
            ALREADY_CONSUMED => Marker::AlreadyConsumed,
            NO_SPACE_TO_PRODUCE => Marker::NoSpaceToProduce,
            other => Marker::Unknown(other),
        }
    }

    /// Raw marker word.
    pub fn as_word(self) -> u64 {
        match self {
            Marker::NotProduced => NOT_PRODUCED,
            Marker::ShouldConsume => SHOULD_CONSUME,
            Marker::AlreadyConsumed => ALREADY_CONSUMED,
            Marker::NoSpaceToProduce => NO_SPACE_TO_PRODUCE,
            Marker::Unknown(word) => word,
        }
    }
}

/// One labeled image sample.
///
/// `width` is always `image.len() / height` (integer division, 0 when the
/// height is 0). `malformed` records that the record did not describe a
/// whole rectangle or carried an undecodable caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Image height in rows
    pub height: u32,
    /// Image width in columns
    pub width: usize,
    /// Caption text
    pub caption: Caption,
    /// Row-major grayscale pixels
    pub image: Vec<u8>,
    /// Record failed a shape or caption check
    pub malformed: bool,
}

impl Sample {
    /// Build a sample for publication.
    ///
    /// The caption must fit in [`MAX_WORD_LENGTH`] bytes and contain no NUL.
    /// A pixel count that is not a multiple of `height` is accepted and
    /// flagged malformed.
    pub fn new(height: u32, caption: &str, image: Vec<u8>) -> ShmResult<Self> {
        if height == 0 {
            return Err(ShmError::InvalidSample {
                reason: "height must be positive".to_string(),
            });
        }
        if caption.as_bytes().contains(&0) {
            return Err(ShmError::InvalidSample {
                reason: "caption contains NUL".to_string(),
            });
        }
        let caption = Caption::try_from(caption).map_err(|_| ShmError::InvalidSample {
            reason: format!(
                "caption of {} bytes exceeds {MAX_WORD_LENGTH}",
                caption.len()
            ),
        })?;

        let width = image.len() / height as usize;
        let malformed = image.len() % height as usize != 0;
        Ok(Self {
            height,
            width,
            caption,
            image,
            malformed,
        })
    }

    /// Bytes this sample occupies in the ring, padding included.
    pub fn encoded_len(&self) -> u64 {
        record_len(self.image.len() as u64)
    }
}

/// A decoded record and where the next one starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// The copied-out sample
    pub sample: Sample,
    /// 8-aligned offset just past this record
    pub next_offset: u64,
}

/// Decode the record at `offset` if its marker says it is ready.
///
/// Returns `Ok(None)` for every marker other than `SHOULD_CONSUME`. The
/// sample is copied out; the slot is untouched until [`mark_consumed`].
pub fn decode_at(region: &RingRegion, offset: u64) -> ShmResult<Option<DecodedRecord>> {
    if region.load_word(offset)? != SHOULD_CONSUME {
        return Ok(None);
    }

    // Upper 32 bits of the height word are not significant
    let height = region.load_word(offset + HEIGHT_OFFSET)? as u32;

    let mut field = [0u8; CAPTION_FIELD_LEN];
    region.read_into(offset + CAPTION_OFFSET, &mut field)?;
    let (caption, caption_ok) = decode_caption(&field)?;

    let size = region.load_word(offset + SIZE_OFFSET)?;
    let payload_start = offset + PAYLOAD_OFFSET;
    let image = region.read_bytes(payload_start, size)?;

    let (width, ragged) = if height == 0 {
        (0, true)
    } else {
        (
            (size / height as u64) as usize,
            size % height as u64 != 0,
        )
    };

    Ok(Some(DecodedRecord {
        sample: Sample {
            height,
            width,
            caption,
            image,
            malformed: ragged || !caption_ok,
        },
        next_offset: offset + record_len(size),
    }))
}

fn decode_caption(field: &[u8; CAPTION_FIELD_LEN]) -> ShmResult<(Caption, bool)> {
    // Unterminated captions are cut at MAX_WORD_LENGTH
    let end = field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(MAX_WORD_LENGTH)
        .min(MAX_WORD_LENGTH);
    let (text, ok) = match std::str::from_utf8(&field[..end]) {
        Ok(text) => (text, true),
        Err(e) => {
            let valid = e.valid_up_to();
            // valid_up_to marks a char boundary, so this cannot fail
            (
                std::str::from_utf8(&field[..valid]).unwrap_or_default(),
                false,
            )
        }
    };
    let caption = Caption::try_from(text).map_err(|_| ShmError::ProtocolViolation {
        reason: format!("caption of {} bytes after NUL scan", text.len()),
    })?;
    Ok((caption, ok))
}

/// Retire the record at `offset`. Call only after its contents are copied out.
pub fn mark_consumed(region: &RingRegion, offset: u64) -> ShmResult<()> {
    region.store_word(offset, ALREADY_CONSUMED)
}

/// Write `sample` into the slot at `offset` and publish it.
///
/// Fields go in first; the `SHOULD_CONSUME` marker is the final store.
/// Returns the offset just past the record.
pub fn encode_at(region: &RingRegion, offset: u64, sample: &Sample) -> ShmResult<u64> {
    if sample.height == 0 {
        return Err(ShmError::InvalidSample {
            reason: "height must be positive".to_string(),
        });
    }
    let size = sample.image.len() as u64;
    let len = record_len(size);
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= region.len())
        .ok_or(ShmError::OutOfBounds {
            offset,
            len,
            size: region.len(),
        })?;

    let mut caption = [0u8; CAPTION_FIELD_LEN];
    caption[..sample.caption.len()].copy_from_slice(sample.caption.as_bytes());

    region.write_from(offset + HEIGHT_OFFSET, &u64::from(sample.height).to_ne_bytes())?;
    region.write_from(offset + CAPTION_OFFSET, &caption)?;
    region.write_from(offset + SIZE_OFFSET, &size.to_ne_bytes())?;
    region.write_from(offset + PAYLOAD_OFFSET, &sample.image)?;
    let padded_from = offset + PAYLOAD_OFFSET + size;
    region.zero(padded_from, end - padded_from)?;

    region.store_word(offset, SHOULD_CONSUME)?;
    Ok(end)
}

/// Tell the consumer the tail from `offset` on was abandoned.
pub fn plant_wrap_sentinel(region: &RingRegion, offset: u64) -> ShmResult<()> {
    region.store_word(offset, NO_SPACE_TO_PRODUCE)
}

/// Swap a wrap sentinel at `offset` to `ALREADY_CONSUMED`.
///
/// Returns whether a sentinel was found.
pub fn retire_wrap_sentinel(region: &RingRegion, offset: u64) -> ShmResult<bool> {
    Ok(region
        .cas_word(offset, NO_SPACE_TO_PRODUCE, ALREADY_CONSUMED)?
        .is_ok())
}
