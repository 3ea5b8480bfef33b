//! Named POSIX semaphore that can pause every producer at once
//!
//! The gate holds a single token. Producers take and immediately return it
//! before each claim, so an open gate costs two uncontended semaphore
//! operations. The orchestrator closes the gate by keeping the token.

use crate::error::{ShmError, ShmResult};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use tracing::debug;

/// Handle on the buffer gate semaphore.
pub struct BufferGate {
    name: String,
    sem: NonNull<libc::sem_t>,
    holding: bool,
}

// SAFETY: POSIX semaphores are process-shared and safe to use from any thread
unsafe impl Send for BufferGate {}

impl BufferGate {
    fn c_name(name: &str) -> ShmResult<CString> {
        CString::new(name).map_err(|_| ShmError::Gate {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"),
        })
    }

    fn gate_error(name: &str) -> ShmError {
        ShmError::Gate {
            name: name.to_string(),
            source: io::Error::last_os_error(),
        }
    }

    /// Create the semaphore with one token. Fails if it already exists.
    pub fn create(name: &str) -> ShmResult<Self> {
        let c_name = Self::c_name(name)?;
        // SAFETY: valid C string; mode and value passed as the variadic ints sem_open expects
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                1 as libc::c_uint,
            )
        };
        Self::wrap(name, sem)
    }

    /// Open an existing semaphore.
    pub fn open(name: &str) -> ShmResult<Self> {
        let c_name = Self::c_name(name)?;
        // SAFETY: valid C string
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::wrap(name, sem)
    }

    fn wrap(name: &str, sem: *mut libc::sem_t) -> ShmResult<Self> {
        if sem == libc::SEM_FAILED {
            return Err(Self::gate_error(name));
        }
        let sem = NonNull::new(sem).ok_or_else(|| Self::gate_error(name))?;
        Ok(Self {
            name: name.to_string(),
            sem,
            holding: false,
        })
    }

    /// Remove the semaphore name. Returns `false` if it did not exist.
    pub fn unlink(name: &str) -> ShmResult<bool> {
        let c_name = Self::c_name(name)?;
        // SAFETY: valid C string
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            Ok(false)
        } else {
            Err(ShmError::Gate {
                name: name.to_string(),
                source: err,
            })
        }
    }

    /// Semaphore name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn wait(&self) -> ShmResult<()> {
        loop {
            // SAFETY: `sem` came from a successful sem_open and is closed only on drop
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(ShmError::Gate {
                    name: self.name.clone(),
                    source: err,
                });
            }
        }
    }

    fn post(&self) -> ShmResult<()> {
        // SAFETY: see `wait`
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(Self::gate_error(&self.name))
        }
    }

    /// Block until the gate is open, then leave it open.
    pub fn pass(&self) -> ShmResult<()> {
        self.wait()?;
        self.post()
    }

    fn try_wait(&self) -> ShmResult<bool> {
        // SAFETY: see `wait`
        if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(false),
            _ => Err(ShmError::Gate {
                name: self.name.clone(),
                source: err,
            }),
        }
    }

    /// Pass only if the gate is open right now.
    pub fn try_pass(&self) -> ShmResult<bool> {
        if !self.try_wait()? {
            return Ok(false);
        }
        self.post()?;
        Ok(true)
    }

    /// Take the token so producers block at their next claim. No-op if this
    /// handle already holds it.
    pub fn close(&mut self) -> ShmResult<()> {
        if self.holding {
            return Ok(());
        }
        self.wait()?;
        self.holding = true;
        debug!("Gate {} closed", self.name);
        Ok(())
    }

    /// Take the token only if it is free right now.
    ///
    /// A producer killed between its wait and post leaves the token taken
    /// forever; callers that must not hang use this in a bounded retry loop.
    pub fn try_close(&mut self) -> ShmResult<bool> {
        if self.holding {
            return Ok(true);
        }
        if !self.try_wait()? {
            return Ok(false);
        }
        self.holding = true;
        debug!("Gate {} closed", self.name);
        Ok(true)
    }

    /// Return a token taken by [`close`](Self::close).
    pub fn reopen(&mut self) -> ShmResult<()> {
        if !self.holding {
            return Ok(());
        }
        self.post()?;
        self.holding = false;
        debug!("Gate {} opened", self.name);
        Ok(())
    }

    /// Whether this handle holds the token.
    pub fn is_closed(&self) -> bool {
        self.holding
    }

    /// Current semaphore count.
    pub fn value(&self) -> ShmResult<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: see `wait`; `value` is a valid out pointer
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } == 0 {
            Ok(value)
        } else {
            Err(Self::gate_error(&self.name))
        }
    }
}

impl Drop for BufferGate {
    fn drop(&mut self) {
        // SAFETY: closed exactly once
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

impl std::fmt::Debug for BufferGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferGate")
            .field("name", &self.name)
            .field("holding", &self.holding)
            .finish()
    }
}
