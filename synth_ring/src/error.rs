//! Error types for ring operations

use thiserror::Error;

/// Errors that can occur while creating, attaching or driving the ring
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment already exists
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Invalid region size
    #[error("Invalid region size: {size} bytes (must be 4KB-1GB, page-aligned)")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// Layout parameters are inconsistent with each other
    #[error("Invalid ring layout: {reason}")]
    InvalidLayout {
        /// What is wrong
        reason: String,
    },

    /// Region exists but the initializer never stamped it ready
    #[error("Segment {name} is not initialized (header marker {marker:#x})")]
    NotInitialized {
        /// Segment name
        name: String,
        /// Marker found at header offset 0
        marker: u64,
    },

    /// Access outside the mapped region
    #[error("Access out of bounds: offset {offset} + {len} exceeds region of {size} bytes")]
    OutOfBounds {
        /// Start offset
        offset: u64,
        /// Access length
        len: u64,
        /// Region size
        size: u64,
    },

    /// Word access at an offset that is not 8-byte aligned
    #[error("Misaligned word access at offset {offset}")]
    Misaligned {
        /// Offending offset
        offset: u64,
    },

    /// Shared state is no longer trustworthy
    #[error("Ring protocol violation: {reason}")]
    ProtocolViolation {
        /// What was observed
        reason: String,
    },

    /// Record can never fit in the record area
    #[error("Record of {len} bytes does not fit in a record area of {capacity} bytes")]
    RecordTooLarge {
        /// Encoded record length
        len: u64,
        /// Usable record area
        capacity: u64,
    },

    /// Sample violates the record shape
    #[error("Invalid sample: {reason}")]
    InvalidSample {
        /// What is wrong
        reason: String,
    },

    /// Payload buffer could not be allocated
    #[error("Allocation of {requested} bytes failed")]
    Allocation {
        /// Requested bytes
        requested: u64,
    },

    /// Semaphore gate operation failed
    #[error("Gate {name}: {source}")]
    Gate {
        /// Semaphore name
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl ShmError {
    /// Fatal errors mean the shared region can no longer be trusted; the
    /// process should report and exit instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShmError::ProtocolViolation { .. }
                | ShmError::OutOfBounds { .. }
                | ShmError::Misaligned { .. }
                | ShmError::Allocation { .. }
        )
    }
}

/// Result type for ring operations
pub type ShmResult<T> = Result<T, ShmError>;
