//! # Process Group
//!
//! [`Supervisor`] implementation on top of `std::process`. Every child gets
//! the ring location through the `SYNTH_RING_*` environment and a
//! parent-death SIGHUP installed between fork and exec, so no producer
//! outlives a crashed orchestrator.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use synth_common::supervisor::{
    ChildRole, HealthStatus, Supervisor, SupervisorError, die_with_parent,
};
use tracing::{debug, info, warn};

/// Interval between exit checks while waiting out the grace period.
const REAP_POLL: Duration = Duration::from_millis(10);

struct ManagedChild {
    role: ChildRole,
    child: Child,
    exited: Option<ExitStatus>,
}

impl ManagedChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Reap without blocking; true once the child is gone.
    fn poll_exit(&mut self) -> io::Result<bool> {
        if self.exited.is_none() {
            self.exited = self.child.try_wait()?;
        }
        Ok(self.exited.is_some())
    }
}

/// Children of one orchestrator.
pub struct ProcessGroup {
    env: Vec<(&'static str, String)>,
    grace: Duration,
    children: Vec<ManagedChild>,
    spawned: usize,
}

impl ProcessGroup {
    /// Empty group whose children inherit `env`.
    pub fn new(env: Vec<(&'static str, String)>, grace: Duration) -> Self {
        Self {
            env,
            grace,
            children: Vec::new(),
            spawned: 0,
        }
    }

    fn command(&self, program: &Path) -> Command {
        let mut command = Command::new(program);
        command.envs(self.env.iter().map(|(k, v)| (*k, v.as_str())));
        command.stdin(Stdio::null());
        // SAFETY: the closure only performs a prctl syscall, which is
        // async-signal-safe
        unsafe {
            command.pre_exec(|| die_with_parent(Signal::SIGHUP).map_err(io::Error::from));
        }
        command
    }

    /// PIDs of every tracked child, in spawn order.
    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().map(ManagedChild::pid).collect()
    }

    /// Number of tracked children that have not exited.
    pub fn running(&mut self) -> usize {
        self.children
            .iter_mut()
            .map(ManagedChild::poll_exit)
            .filter(|exited| !matches!(exited, Ok(true)))
            .count()
    }

    /// Grace period granted after SIGTERM.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    fn wait_all(&mut self, deadline: Instant) {
        loop {
            let pending = self.running();
            if pending == 0 || Instant::now() >= deadline {
                return;
            }
            std::thread::sleep(REAP_POLL);
        }
    }
}

impl Supervisor for ProcessGroup {
    fn run_initializer(&mut self, program: &Path) -> Result<(), SupervisorError> {
        info!("Running initializer {}", program.display());
        let status = self
            .command(program)
            .status()
            .map_err(|e| SupervisorError::SpawnFailed {
                role: ChildRole::Initializer,
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SupervisorError::InitFailed {
                status: status.to_string(),
            })
        }
    }

    fn spawn_producer(&mut self, program: &Path, config: &Path) -> Result<u32, SupervisorError> {
        let role = ChildRole::Producer(self.spawned);
        let child = self
            .command(program)
            .arg(config)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed {
                role,
                reason: e.to_string(),
            })?;
        self.spawned += 1;

        let pid = child.id();
        info!("Started {:?} as pid {}", role, pid);
        self.children.push(ManagedChild {
            role,
            child,
            exited: None,
        });
        Ok(pid)
    }

    fn health_check(&mut self, pid: u32) -> HealthStatus {
        let Some(managed) = self.children.iter_mut().find(|c| c.pid() == pid) else {
            return HealthStatus::Unknown;
        };
        match managed.poll_exit() {
            Ok(false) => HealthStatus::Running,
            Ok(true) => HealthStatus::Exited {
                exit_code: managed.exited.and_then(|s| s.code()),
            },
            Err(e) => {
                warn!("Health check of pid {} failed: {}", pid, e);
                HealthStatus::Unknown
            }
        }
    }

    fn shutdown_all(&mut self) -> Result<(), SupervisorError> {
        if self.children.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        // Reverse spawn order
        for managed in self.children.iter_mut().rev() {
            if matches!(managed.poll_exit(), Ok(true)) {
                continue;
            }
            let pid = managed.pid();
            debug!("SIGTERM -> {:?} (pid {})", managed.role, pid);
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(source) => {
                    warn!("Failed to signal pid {}: {}", pid, source);
                    first_error.get_or_insert(SupervisorError::Signal { pid, source });
                }
            }
        }

        self.wait_all(Instant::now() + self.grace);

        for managed in self.children.iter_mut() {
            if matches!(managed.poll_exit(), Ok(true)) {
                continue;
            }
            warn!(
                "{:?} (pid {}) ignored SIGTERM for {:?}, killing",
                managed.role,
                managed.pid(),
                self.grace
            );
            if let Err(e) = managed.child.kill() {
                warn!("SIGKILL of pid {} failed: {}", managed.pid(), e);
            }
            match managed.child.wait() {
                Ok(status) => managed.exited = Some(status),
                Err(e) => {
                    first_error.get_or_insert(SupervisorError::Other(format!(
                        "failed to reap pid {}: {e}",
                        managed.pid()
                    )));
                }
            }
        }

        for managed in &self.children {
            debug!("{:?} (pid {}) exited: {:?}", managed.role, managed.pid(), managed.exited);
        }
        self.children.clear();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_all() {
            warn!("Process group teardown: {}", e);
        }
    }
}
