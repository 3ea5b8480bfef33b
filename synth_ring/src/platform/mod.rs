//! Platform-specific mapping and process helpers

mod linux;

pub use linux::{
    MapConfig, anonymous_mmap, attach_segment_mmap, create_segment_mmap, get_current_pid,
    is_process_alive,
};
