//! The mapped ring region and its header words
//!
//! A [`RingRegion`] is one process's mapping of the shared segment. Every
//! access is bounds-checked against the mapping; word access additionally
//! requires 8-byte alignment and goes through `AtomicU64` so marker and
//! cursor updates are visible across processes with acquire/release
//! semantics.

use crate::error::{ShmError, ShmResult};
use crate::layout::{RingConfig, RingLayout};
use crate::platform::{MapConfig, anonymous_mmap, attach_segment_mmap, create_segment_mmap};
use memmap2::MmapMut;
use static_assertions::const_assert;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use synth_common::consts::{
    HEADER_CONSUME_CURSOR_OFFSET, HEADER_MIN_LEN, HEADER_PRODUCE_CURSOR_OFFSET,
    HEADER_STATE_OFFSET, RING_READY, WORD_SIZE,
};
use tracing::{debug, info};

const_assert!(std::mem::size_of::<AtomicU64>() == WORD_SIZE);
const_assert!(std::mem::align_of::<AtomicU64>() <= WORD_SIZE);
const_assert!(HEADER_PRODUCE_CURSOR_OFFSET + WORD_SIZE <= HEADER_MIN_LEN);

/// One mapping of the shared ring segment.
pub struct RingRegion {
    name: String,
    path: Option<PathBuf>,
    base: NonNull<u8>,
    len: u64,
    // Keeps the mapping alive; all access goes through `base`
    _mmap: MmapMut,
}

// SAFETY: the mapping is shared with other processes anyway; all mutation
// goes through bounds-checked atomics or copies into disjoint claimed slots.
unsafe impl Send for RingRegion {}
unsafe impl Sync for RingRegion {}

impl RingRegion {
    fn from_mmap(name: String, path: Option<PathBuf>, mut mmap: MmapMut) -> ShmResult<Self> {
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| ShmError::InvalidLayout {
            reason: "mapping returned a null base".to_string(),
        })?;
        if base.as_ptr() as usize % WORD_SIZE != 0 {
            return Err(ShmError::Misaligned {
                offset: base.as_ptr() as u64,
            });
        }
        let len = mmap.len() as u64;
        Ok(Self {
            name,
            path,
            base,
            len,
            _mmap: mmap,
        })
    }

    /// Create the segment file, initialize the header and stamp it ready.
    ///
    /// Fails with `AlreadyExists` if a segment of the same name is present.
    pub fn create(config: &RingConfig) -> ShmResult<Self> {
        let layout = config.layout()?;
        let path = config.segment_path();
        let mmap = create_segment_mmap(&path, config.size, &MapConfig::default())?;
        let region = Self::from_mmap(config.name.clone(), Some(path), mmap)?;
        region.initialize(&layout)?;

        info!(
            "Created ring '{}' at {} ({} bytes, records from {})",
            region.name,
            config.segment_path().display(),
            layout.size(),
            layout.record_start()
        );
        Ok(region)
    }

    /// Map an existing, initialized segment.
    ///
    /// The mapped size must match the config and the header must carry the
    /// ready marker.
    pub fn attach(config: &RingConfig) -> ShmResult<Self> {
        let layout = config.layout()?;
        let path = config.segment_path();
        let mmap = attach_segment_mmap(&path)?;
        let region = Self::from_mmap(config.name.clone(), Some(path), mmap)?;

        if region.len != layout.size() {
            return Err(ShmError::InvalidLayout {
                reason: format!(
                    "segment {} is {} bytes, config expects {}",
                    region.name,
                    region.len,
                    layout.size()
                ),
            });
        }

        let marker = region.state()?;
        if marker != RING_READY {
            return Err(ShmError::NotInitialized {
                name: region.name.clone(),
                marker,
            });
        }

        debug!("Attached ring '{}' ({} bytes)", region.name, region.len);
        Ok(region)
    }

    /// A private anonymous region with an initialized header, for rings that
    /// never leave the process.
    pub fn anonymous(layout: &RingLayout) -> ShmResult<Self> {
        let mmap = anonymous_mmap(layout.size() as usize)?;
        let region = Self::from_mmap("anonymous".to_string(), None, mmap)?;
        region.initialize(layout)?;
        Ok(region)
    }

    /// Remove a segment file. Returns `false` if there was nothing to remove.
    pub fn remove(config: &RingConfig) -> ShmResult<bool> {
        remove_segment(&config.segment_path())
    }

    /// Write a fresh header: both cursors at `record_start` of lap 0, then
    /// the `RING_READY` stamp in word 0.
    ///
    /// Word 0 is reserved for the stamp rather than used as a record slot;
    /// the record area begins at `record_start`.
    fn initialize(&self, layout: &RingLayout) -> ShmResult<()> {
        self.store_word(HEADER_STATE_OFFSET as u64, 0)?;
        self.store_word(HEADER_CONSUME_CURSOR_OFFSET as u64, layout.record_start())?;
        self.store_word(HEADER_PRODUCE_CURSOR_OFFSET as u64, layout.record_start())?;
        // Ready marker goes last so attachers never see a half-built header
        self.store_word(HEADER_STATE_OFFSET as u64, RING_READY)
    }

    /// Ring name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the mapping is empty (never true for a validated ring).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_range(&self, offset: u64, len: u64) -> ShmResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(ShmError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    fn word(&self, offset: u64) -> ShmResult<&AtomicU64> {
        if offset % WORD_SIZE as u64 != 0 {
            return Err(ShmError::Misaligned { offset });
        }
        self.check_range(offset, WORD_SIZE as u64)?;
        // SAFETY: in bounds, 8-aligned (page-aligned base), lives as long as `self`
        Ok(unsafe { &*(self.base.as_ptr().add(offset as usize) as *const AtomicU64) })
    }

    /// Acquire-load the word at `offset`.
    pub fn load_word(&self, offset: u64) -> ShmResult<u64> {
        Ok(self.word(offset)?.load(Ordering::Acquire))
    }

    /// Release-store `value` at `offset`.
    pub fn store_word(&self, offset: u64, value: u64) -> ShmResult<()> {
        self.word(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    /// Compare-and-swap the word at `offset`.
    ///
    /// The inner result is `Err(actual)` when the word did not hold `current`.
    pub fn cas_word(&self, offset: u64, current: u64, new: u64) -> ShmResult<Result<u64, u64>> {
        Ok(self
            .word(offset)?
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire))
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> ShmResult<()> {
        self.check_range(offset, buf.len() as u64)?;
        // SAFETY: range checked; `buf` is a distinct allocation
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset as usize),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `len` bytes starting at `offset` into a fresh buffer.
    ///
    /// Allocation failure is reported as `ShmError::Allocation`.
    pub fn read_bytes(&self, offset: u64, len: u64) -> ShmResult<Vec<u8>> {
        self.check_range(offset, len)?;
        let count = usize::try_from(len).map_err(|_| ShmError::Allocation { requested: len })?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(count)
            .map_err(|_| ShmError::Allocation { requested: len })?;
        buf.resize(count, 0);
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Copy `data` into the region at `offset`.
    pub fn write_from(&self, offset: u64, data: &[u8]) -> ShmResult<()> {
        self.check_range(offset, data.len() as u64)?;
        // SAFETY: range checked; the caller owns this slot by claim
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.base.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Zero `len` bytes at `offset`.
    pub fn zero(&self, offset: u64, len: u64) -> ShmResult<()> {
        self.check_range(offset, len)?;
        // SAFETY: range checked
        unsafe {
            std::ptr::write_bytes(self.base.as_ptr().add(offset as usize), 0, len as usize);
        }
        Ok(())
    }

    /// Header state marker (word 0), `RING_READY` once initialized.
    pub fn state(&self) -> ShmResult<u64> {
        self.load_word(HEADER_STATE_OFFSET as u64)
    }

    /// Published consume cursor position (0 when never set).
    pub fn consume_cursor(&self) -> ShmResult<u64> {
        self.load_word(HEADER_CONSUME_CURSOR_OFFSET as u64)
    }

    /// Publish the consumer's ring position.
    pub fn publish_consume_cursor(&self, cursor: u64) -> ShmResult<()> {
        self.store_word(HEADER_CONSUME_CURSOR_OFFSET as u64, cursor)
    }

    /// Ring position of the next claim.
    pub fn produce_cursor(&self) -> ShmResult<u64> {
        self.load_word(HEADER_PRODUCE_CURSOR_OFFSET as u64)
    }

    /// Try to move the produce cursor from `current` to `new`.
    pub fn cas_produce_cursor(&self, current: u64, new: u64) -> ShmResult<Result<u64, u64>> {
        self.cas_word(HEADER_PRODUCE_CURSOR_OFFSET as u64, current, new)
    }
}

impl std::fmt::Debug for RingRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingRegion")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

/// Remove a segment file. Returns `false` if there was nothing to remove.
pub fn remove_segment(path: &Path) -> ShmResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> RingConfig {
        RingConfig {
            name: "region_test".into(),
            shm_dir: dir.to_path_buf(),
            size: 8192,
            record_start: 64,
            min_chunk: 256,
        }
    }

    #[test]
    fn test_create_initializes_header() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let region = RingRegion::create(&config).unwrap();

        assert_eq!(region.len(), 8192);
        assert_eq!(region.state().unwrap(), RING_READY);
        assert_eq!(region.consume_cursor().unwrap(), 64);
        assert_eq!(region.produce_cursor().unwrap(), 64);
        assert_eq!(region.path(), Some(config.segment_path().as_path()));
    }

    #[test]
    fn test_state_word_is_outside_record_area() {
        use crate::record::{Sample, decode_at, encode_at};

        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let region = RingRegion::create(&config).unwrap();

        // The first record lands at record_start and leaves the stamp alone
        let sample = Sample::new(2, "first", vec![1; 16]).unwrap();
        encode_at(&region, config.record_start as u64, &sample).unwrap();
        assert_eq!(region.state().unwrap(), RING_READY);
        assert!(decode_at(&region, HEADER_STATE_OFFSET as u64).unwrap().is_none());
        assert!(decode_at(&region, config.record_start as u64).unwrap().is_some());
    }

    #[test]
    fn test_attach_sees_creator_writes() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let creator = RingRegion::create(&config).unwrap();
        let attached = RingRegion::attach(&config).unwrap();

        creator.store_word(64, 0xDEAD_BEEF).unwrap();
        assert_eq!(attached.load_word(64).unwrap(), 0xDEAD_BEEF);

        attached.write_from(100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        creator.read_into(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_attach_rejects_uninitialized_segment() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let _raw = create_segment_mmap(&config.segment_path(), 8192, &MapConfig::default()).unwrap();

        let result = RingRegion::attach(&config);
        assert!(matches!(
            result,
            Err(ShmError::NotInitialized { marker: 0, .. })
        ));
    }

    #[test]
    fn test_attach_rejects_size_mismatch() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let _region = RingRegion::create(&config).unwrap();

        let bigger = RingConfig {
            size: 16384,
            ..config
        };
        assert!(matches!(
            RingRegion::attach(&bigger),
            Err(ShmError::InvalidLayout { .. })
        ));
    }

    #[test]
    fn test_create_twice_fails_then_remove() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let _region = RingRegion::create(&config).unwrap();
        assert!(matches!(
            RingRegion::create(&config),
            Err(ShmError::AlreadyExists { .. })
        ));

        assert!(RingRegion::remove(&config).unwrap());
        assert!(!RingRegion::remove(&config).unwrap());
        assert!(matches!(
            RingRegion::attach(&config),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn test_word_access_checks() {
        let layout = RingLayout::new(4096, 64, 128).unwrap();
        let region = RingRegion::anonymous(&layout).unwrap();

        assert!(matches!(
            region.load_word(12),
            Err(ShmError::Misaligned { offset: 12 })
        ));
        assert!(matches!(
            region.load_word(4096),
            Err(ShmError::OutOfBounds { .. })
        ));
        assert!(region.load_word(4088).is_ok());
        assert!(matches!(
            region.read_bytes(4000, 200),
            Err(ShmError::OutOfBounds { .. })
        ));
        assert!(matches!(
            region.write_from(u64::MAX - 2, b"abc"),
            Err(ShmError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_cas_word() {
        let layout = RingLayout::new(4096, 64, 128).unwrap();
        let region = RingRegion::anonymous(&layout).unwrap();

        assert_eq!(region.cas_produce_cursor(64, 200).unwrap(), Ok(64));
        assert_eq!(region.cas_produce_cursor(64, 300).unwrap(), Err(200));
        assert_eq!(region.produce_cursor().unwrap(), 200);
    }

    #[test]
    fn test_zero_clears_bytes() {
        let layout = RingLayout::new(4096, 64, 128).unwrap();
        let region = RingRegion::anonymous(&layout).unwrap();
        region.write_from(200, &[0xFF; 16]).unwrap();
        region.zero(204, 8).unwrap();
        let bytes = region.read_bytes(200, 16).unwrap();
        assert_eq!(&bytes[..4], &[0xFF; 4]);
        assert_eq!(&bytes[4..12], &[0; 8]);
        assert_eq!(&bytes[12..], &[0xFF; 4]);
    }
}
