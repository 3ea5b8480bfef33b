//! Workspace-wide constants for the sample ring.
//!
//! Single source of truth for record layout, marker values and ring sizing
//! limits. Producers and the consumer must agree on every value here.

/// Maximum caption length in bytes (excluding the NUL terminator).
pub const MAX_WORD_LENGTH: usize = 63;

/// Size of the caption field on the wire (caption + NUL).
pub const CAPTION_FIELD_LEN: usize = MAX_WORD_LENGTH + 1;

/// Size of one header/marker word.
pub const WORD_SIZE: usize = 8;

/// Records always start on this boundary.
pub const RECORD_ALIGN: usize = 8;

/// Fixed part of a record: marker, height, caption, size.
pub const RECORD_HEADER_LEN: usize = WORD_SIZE + WORD_SIZE + CAPTION_FIELD_LEN + WORD_SIZE;

/// Smallest region the ring accepts (one page).
pub const RING_MIN_SIZE: usize = 4096;

/// Largest region the ring accepts (1GB).
pub const RING_MAX_SIZE: usize = 1_073_741_824;

/// Default region size (32MB).
pub const DEFAULT_RING_SIZE: usize = 32 * 1024 * 1024;

/// Default offset of the first record. One cache line of header.
pub const DEFAULT_RECORD_START: usize = 64;

/// Default wrap threshold: a cursor closer than this to the end wraps.
pub const DEFAULT_MIN_CHUNK: usize = 1024;

/// Header offset of the region state marker.
///
/// Layout change: word 0 no longer belongs to the record area. It carries
/// [`RING_READY`] so attachers can tell a finished header from a half-built
/// one, and records start at `record_start` (at least [`HEADER_MIN_LEN`])
/// instead. Readers that treated word 0 as a record marker must not be
/// pointed at these regions.
pub const HEADER_STATE_OFFSET: usize = 0;

/// Header offset of the published consume cursor, a ring position
/// (`lap * size + offset`).
pub const HEADER_CONSUME_CURSOR_OFFSET: usize = 8;

/// Header offset of the shared produce cursor, a ring position
/// (`lap * size + offset`) advanced by compare-and-swap.
pub const HEADER_PRODUCE_CURSOR_OFFSET: usize = 16;

/// Bytes of header that must precede the record area.
pub const HEADER_MIN_LEN: usize = 24;

/// Slot has never been written.
pub const NOT_PRODUCED: u64 = 0;

/// Slot holds a complete record ready for the consumer.
pub const SHOULD_CONSUME: u64 = u64::from_le_bytes(*b"SYNRDY\0\0");

/// Slot was drained by the consumer and may be overwritten.
pub const ALREADY_CONSUMED: u64 = u64::from_le_bytes(*b"SYNDONE\0");

/// Producer abandoned the tail of the region; consumer must wrap.
pub const NO_SPACE_TO_PRODUCE: u64 = u64::from_le_bytes(*b"SYNWRAP\0");

/// Header state marker stamped by the initializer once the region is usable.
pub const RING_READY: u64 = u64::from_le_bytes(*b"SYNRING\0");

/// Segment file prefix inside the shm directory.
pub const SEGMENT_PREFIX: &str = "synth_";

/// Default directory holding segment files.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Default ring name.
pub const DEFAULT_RING_NAME: &str = "samples";

/// Conventional program name of the buffer initializer.
pub const INITIALIZER_PROGRAM: &str = "synth_base";

/// Conventional program name of a producer.
pub const PRODUCER_PROGRAM: &str = "synth_producer";
