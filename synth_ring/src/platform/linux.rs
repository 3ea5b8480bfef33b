//! Linux-specific shared memory operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Mapping options for a segment file
#[derive(Debug, Clone, Copy)]
pub struct MapConfig {
    /// Pre-fault the pages on creation (MAP_POPULATE)
    pub populate: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self { populate: true }
    }
}

/// Create a fresh segment file of `size` bytes and map it shared.
///
/// Fails with `AlreadyExists` if the file is present; stale segments must be
/// removed explicitly by the caller.
pub fn create_segment_mmap(path: &Path, size: usize, config: &MapConfig) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => ShmError::AlreadyExists {
                name: path.display().to_string(),
            },
            _ => ShmError::Io { source: e },
        })?;

    // Extending a fresh file zero-fills it
    file.set_len(size as u64)?;

    let mut options = MmapOptions::new();
    if config.populate {
        options.populate();
    }

    let mmap = unsafe { options.map_mut(&file)? };
    Ok(mmap)
}

/// Map an existing segment file shared
pub fn attach_segment_mmap(path: &Path) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ShmError::NotFound {
                name: path.display().to_string(),
            },
            _ => ShmError::Io { source: e },
        })?;

    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Process-private anonymous mapping, used for in-process rings
pub fn anonymous_mmap(size: usize) -> ShmResult<MmapMut> {
    Ok(MmapMut::map_anon(size)?)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // A null signal tests for existence without delivering anything
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        Err(nix::Error::EPERM) => true, // exists, not ours to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
