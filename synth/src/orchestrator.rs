//! # Orchestrator
//!
//! Drives one ring through its lifecycle:
//!
//! ```text
//! Init ──► ScaleOut ──► Attach ──► Run ──► Teardown ──► Stopped
//!  │          │            │        │
//!  └──────────┴────────────┴────────┴──► Teardown on error or shutdown()
//! ```
//!
//! - **Init** runs the initializer to completion; the ring and its gate
//!   exist afterwards.
//! - **ScaleOut** starts the producers, staggered so their clock seeds
//!   differ. Individual spawn failures are logged; zero producers is fatal.
//! - **Attach** maps the ring as the single consumer.
//! - **Run** hands out samples in ring order.
//! - **Teardown** closes the gate, stops the producers and removes the
//!   segment and the gate. It runs at most once, also from `Drop`.

use crate::config::SynthConfig;
use crate::error::SynthError;
use crate::process_group::ProcessGroup;
use std::time::{Duration, Instant};
use synth_common::supervisor::{HealthStatus, Supervisor};
use synth_ring::{BufferGate, Consumer, ConsumerStats, RingRegion, Sample};
use tracing::{debug, error, info, warn};

/// How long teardown tries to take the gate token before giving up.
const GATE_CLOSE_TIMEOUT: Duration = Duration::from_millis(200);

/// Orchestrator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Init,
    ScaleOut,
    Attach,
    Run,
    Teardown,
    Stopped,
}

/// Owns the producers and the consumer side of one ring.
pub struct Orchestrator<S: Supervisor = ProcessGroup> {
    config: SynthConfig,
    supervisor: S,
    state: OrchestratorState,
    consumer: Option<Consumer>,
    gate: Option<BufferGate>,
    producers: Vec<u32>,
}

impl Orchestrator<ProcessGroup> {
    /// Orchestrator whose children are real processes.
    pub fn new(config: SynthConfig) -> Self {
        let group = ProcessGroup::new(config.ring.to_env(), config.shutdown.grace());
        Self::with_supervisor(config, group)
    }
}

impl<S: Supervisor> Orchestrator<S> {
    /// Orchestrator on top of any supervisor.
    pub fn with_supervisor(config: SynthConfig, supervisor: S) -> Self {
        Self {
            config,
            supervisor,
            state: OrchestratorState::Init,
            consumer: None,
            gate: None,
            producers: Vec::new(),
        }
    }

    /// Run Init, ScaleOut and Attach. On failure everything already
    /// created is torn down before the error is returned.
    pub fn start(&mut self) -> Result<(), SynthError> {
        let result = self
            .init()
            .and_then(|()| self.scale_out())
            .and_then(|()| self.attach());

        if let Err(e) = result {
            error!("Startup failed in {:?}: {}", self.state, e);
            if let Err(teardown) = self.shutdown() {
                warn!("Teardown after failed startup: {}", teardown);
            }
            return Err(e);
        }
        Ok(())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: OrchestratorState,
    ) -> Result<(), SynthError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SynthError::InvalidState {
                operation,
                expected,
                actual: self.state,
            })
        }
    }

    /// Create the ring by running the initializer.
    pub fn init(&mut self) -> Result<(), SynthError> {
        self.expect_state("init", OrchestratorState::Init)?;
        let program = self.config.initializer.program.clone();
        self.supervisor
            .run_initializer(&program)
            .map_err(SynthError::InitFailed)?;

        info!("Ring '{}' initialized", self.config.ring.name);
        self.state = OrchestratorState::ScaleOut;
        Ok(())
    }

    /// Start the configured number of producers.
    pub fn scale_out(&mut self) -> Result<(), SynthError> {
        self.expect_state("scale_out", OrchestratorState::ScaleOut)?;
        let producers = &self.config.producers;
        let requested = producers.count;

        for index in 0..requested {
            if index > 0 && !producers.stagger().is_zero() {
                std::thread::sleep(producers.stagger());
            }
            match self
                .supervisor
                .spawn_producer(&producers.program, &producers.config)
            {
                Ok(pid) => self.producers.push(pid),
                Err(e) => error!("Producer {} of {}: {}", index + 1, requested, e),
            }
        }

        if self.producers.is_empty() {
            return Err(SynthError::NoProducers { requested });
        }
        if self.producers.len() < requested {
            warn!(
                "Running with {} of {} producers",
                self.producers.len(),
                requested
            );
        }
        self.state = OrchestratorState::Attach;
        Ok(())
    }

    /// Attach the consumer and the gate.
    pub fn attach(&mut self) -> Result<(), SynthError> {
        self.expect_state("attach", OrchestratorState::Attach)?;
        let ring = &self.config.ring;
        self.consumer = Some(Consumer::attach(ring, self.config.consumer.poll_strategy())?);

        self.gate = match BufferGate::open(&ring.gate_name()) {
            Ok(gate) => Some(gate),
            Err(e) => {
                warn!("Gate unavailable, producers cannot be paused: {}", e);
                None
            }
        };

        info!(
            "Consuming ring '{}' from {} producers",
            ring.name,
            self.producers.len()
        );
        self.state = OrchestratorState::Run;
        Ok(())
    }

    fn consumer_mut(&mut self, operation: &'static str) -> Result<&mut Consumer, SynthError> {
        self.expect_state(operation, OrchestratorState::Run)?;
        self.consumer.as_mut().ok_or(SynthError::InvalidState {
            operation,
            expected: OrchestratorState::Run,
            actual: self.state,
        })
    }

    /// Block until the next sample arrives.
    pub fn next_sample(&mut self) -> Result<Sample, SynthError> {
        Ok(self.consumer_mut("next_sample")?.poll_blocking()?)
    }

    /// Next sample, or `None` once `timeout` passes without one.
    pub fn next_sample_timeout(&mut self, timeout: Duration) -> Result<Option<Sample>, SynthError> {
        Ok(self.consumer_mut("next_sample_timeout")?.poll_timeout(timeout)?)
    }

    /// Blocking iterator over samples. Ends after the first error.
    pub fn samples(&mut self) -> Samples<'_, S> {
        Samples {
            orchestrator: self,
            done: false,
        }
    }

    /// Stop producers at their next claim.
    pub fn pause_producers(&mut self) -> Result<bool, SynthError> {
        self.expect_state("pause_producers", OrchestratorState::Run)?;
        match self.gate.as_mut() {
            Some(gate) => Ok(close_gate(gate, GATE_CLOSE_TIMEOUT)?),
            None => Ok(false),
        }
    }

    /// Let paused producers continue.
    pub fn resume_producers(&mut self) -> Result<(), SynthError> {
        self.expect_state("resume_producers", OrchestratorState::Run)?;
        if let Some(gate) = self.gate.as_mut() {
            gate.reopen()?;
        }
        Ok(())
    }

    /// Whether the gate is currently held closed.
    pub fn producers_paused(&self) -> bool {
        self.gate.as_ref().is_some_and(BufferGate::is_closed)
    }

    /// Liveness of every started producer.
    pub fn health(&mut self) -> Vec<(u32, HealthStatus)> {
        self.producers
            .iter()
            .map(|&pid| (pid, self.supervisor.health_check(pid)))
            .collect()
    }

    /// Number of producers still running.
    pub fn live_producers(&mut self) -> usize {
        let pids = &self.producers;
        let supervisor = &mut self.supervisor;
        pids.iter()
            .filter(|&&pid| supervisor.health_check(pid) == HealthStatus::Running)
            .count()
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// PIDs of started producers.
    pub fn producer_pids(&self) -> &[u32] {
        &self.producers
    }

    /// Consumer counters, once attached.
    pub fn stats(&self) -> Option<ConsumerStats> {
        self.consumer.as_ref().map(Consumer::stats)
    }

    /// Configuration in use.
    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Tear everything down. Safe to call repeatedly; later calls are no-ops.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn shutdown(&mut self) -> Result<(), SynthError> {
        if matches!(
            self.state,
            OrchestratorState::Teardown | OrchestratorState::Stopped
        ) {
            return Ok(());
        }
        let from = self.state;
        self.state = OrchestratorState::Teardown;
        info!("Shutting down from {:?}", from);

        let mut first_error: Option<SynthError> = None;

        if let Some(gate) = self.gate.as_mut() {
            match close_gate(gate, GATE_CLOSE_TIMEOUT) {
                Ok(true) => debug!("Gate closed for teardown"),
                Ok(false) => warn!("Gate token not returned, stopping producers anyway"),
                Err(e) => {
                    first_error.get_or_insert(e.into());
                }
            }
        }

        if let Err(e) = self.supervisor.shutdown_all() {
            error!("Stopping producers: {}", e);
            first_error.get_or_insert(e.into());
        }

        if let Some(stats) = self.consumer.take().map(|c| c.stats()) {
            info!(
                "Consumed {} samples ({} malformed, {} wraps, {} bytes)",
                stats.samples, stats.malformed, stats.wraps, stats.bytes
            );
        }
        self.gate = None;

        // Init never ran, so nothing here is ours
        if from != OrchestratorState::Init {
            let ring = &self.config.ring;
            match RingRegion::remove(ring) {
                Ok(removed) => debug!("Segment removed: {}", removed),
                Err(e) => {
                    first_error.get_or_insert(e.into());
                }
            }
            match BufferGate::unlink(&ring.gate_name()) {
                Ok(removed) => debug!("Gate unlinked: {}", removed),
                Err(e) => {
                    first_error.get_or_insert(e.into());
                }
            }
        }

        self.producers.clear();
        self.state = OrchestratorState::Stopped;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: Supervisor> Drop for Orchestrator<S> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Teardown on drop: {}", e);
        }
    }
}

fn close_gate(gate: &mut BufferGate, timeout: Duration) -> synth_ring::ShmResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if gate.try_close()? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Iterator returned by [`Orchestrator::samples`].
pub struct Samples<'a, S: Supervisor> {
    orchestrator: &'a mut Orchestrator<S>,
    done: bool,
}

impl<S: Supervisor> Iterator for Samples<'_, S> {
    type Item = Result<Sample, SynthError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.orchestrator.next_sample();
        self.done = item.is_err();
        Some(item)
    }
}

impl<S: Supervisor> std::iter::FusedIterator for Samples<'_, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use synth_common::config::ConfigLoader;
    use synth_common::supervisor::SupervisorError;
    use synth_ring::{RingConfig, RingProducer, Spin, Unbounded};
    use tempfile::TempDir;

    /// Creates the ring in-process instead of running programs.
    struct InProcess {
        ring: RingConfig,
        fail_init: bool,
        spawnable: usize,
        spawned: Vec<u32>,
        shutdowns: usize,
    }

    impl Supervisor for InProcess {
        fn run_initializer(&mut self, _program: &Path) -> Result<(), SupervisorError> {
            if self.fail_init {
                return Err(SupervisorError::InitFailed {
                    status: "exit status: 1".into(),
                });
            }
            RingRegion::create(&self.ring).map_err(|e| SupervisorError::Other(e.to_string()))?;
            BufferGate::create(&self.ring.gate_name())
                .map_err(|e| SupervisorError::Other(e.to_string()))?;
            Ok(())
        }

        fn spawn_producer(&mut self, _program: &Path, _config: &Path) -> Result<u32, SupervisorError> {
            if self.spawned.len() == self.spawnable {
                return Err(SupervisorError::SpawnFailed {
                    role: synth_common::supervisor::ChildRole::Producer(self.spawned.len()),
                    reason: "refused".into(),
                });
            }
            let pid = 1000 + self.spawned.len() as u32;
            self.spawned.push(pid);
            Ok(pid)
        }

        fn health_check(&mut self, pid: u32) -> HealthStatus {
            if self.spawned.contains(&pid) {
                HealthStatus::Running
            } else {
                HealthStatus::Unknown
            }
        }

        fn shutdown_all(&mut self) -> Result<(), SupervisorError> {
            self.shutdowns += 1;
            self.spawned.clear();
            Ok(())
        }
    }

    fn setup(tag: &str, count: usize, spawnable: usize) -> (TempDir, Orchestrator<InProcess>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SynthConfig::from_toml(
            r#"
[shared]
service_name = "orchestrator-test"

[producers]
config = "producer.toml"
stagger_ms = 0

[consumer]
strategy = "yield"

[shutdown]
grace_ms = 100
"#,
        )
        .unwrap();
        config.producers.count = count;
        config.ring = RingConfig {
            name: format!("orch_{}_{tag}", std::process::id()),
            shm_dir: dir.path().to_path_buf(),
            size: 64 * 1024,
            ..RingConfig::default()
        };
        let _ = BufferGate::unlink(&config.ring.gate_name());

        let supervisor = InProcess {
            ring: config.ring.clone(),
            fail_init: false,
            spawnable,
            spawned: Vec::new(),
            shutdowns: 0,
        };
        (dir, Orchestrator::with_supervisor(config, supervisor))
    }

    fn local_producer(config: &SynthConfig) -> RingProducer {
        RingProducer::attach(&config.ring, Box::new(Unbounded), Box::new(Spin)).unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let (_dir, mut orch) = setup("lifecycle", 3, 3);
        assert_eq!(orch.state(), OrchestratorState::Init);
        orch.start().unwrap();
        assert_eq!(orch.state(), OrchestratorState::Run);
        assert_eq!(orch.producer_pids(), &[1000, 1001, 1002]);
        assert_eq!(orch.live_producers(), 3);

        let mut producer = local_producer(orch.config());
        producer.publish(&Sample::new(32, "cat", vec![0u8; 320]).unwrap()).unwrap();
        producer.publish(&Sample::new(4, "dog", vec![1u8; 8]).unwrap()).unwrap();

        let first = orch.next_sample().unwrap();
        assert_eq!((first.height, first.width, first.caption.as_str()), (32, 10, "cat"));
        let second = orch.samples().next().unwrap().unwrap();
        assert_eq!(second.caption.as_str(), "dog");
        assert!(
            orch.next_sample_timeout(Duration::from_millis(10))
                .unwrap()
                .is_none()
        );
        assert_eq!(orch.stats().unwrap().samples, 2);

        let segment = orch.config().ring.segment_path();
        assert!(segment.exists());
        orch.shutdown().unwrap();
        assert_eq!(orch.state(), OrchestratorState::Stopped);
        assert!(!segment.exists());
        assert!(BufferGate::open(&orch.config().ring.gate_name()).is_err());
        assert_eq!(orch.supervisor.shutdowns, 1);

        // Second call is a no-op
        orch.shutdown().unwrap();
        assert_eq!(orch.supervisor.shutdowns, 1);
    }

    #[test]
    fn test_init_failure_stops() {
        let (_dir, mut orch) = setup("init_fail", 2, 2);
        orch.supervisor.fail_init = true;
        let result = orch.start();
        assert!(matches!(result, Err(SynthError::InitFailed(_))));
        assert_eq!(orch.state(), OrchestratorState::Stopped);
        assert!(orch.supervisor.spawned.is_empty());
    }

    #[test]
    fn test_partial_scale_out_continues() {
        let (_dir, mut orch) = setup("partial", 4, 2);
        orch.start().unwrap();
        assert_eq!(orch.producer_pids().len(), 2);
        assert_eq!(orch.state(), OrchestratorState::Run);
    }

    #[test]
    fn test_no_producers_tears_down() {
        let (_dir, mut orch) = setup("none", 2, 0);
        let segment = orch.config().ring.segment_path();
        let result = orch.start();
        assert!(matches!(result, Err(SynthError::NoProducers { requested: 2 })));
        assert_eq!(orch.state(), OrchestratorState::Stopped);
        assert!(!segment.exists());
    }

    #[test]
    fn test_phase_order_enforced() {
        let (_dir, mut orch) = setup("order", 1, 1);
        assert!(matches!(
            orch.next_sample_timeout(Duration::ZERO),
            Err(SynthError::InvalidState {
                expected: OrchestratorState::Run,
                actual: OrchestratorState::Init,
                ..
            })
        ));
        assert!(matches!(orch.attach(), Err(SynthError::InvalidState { .. })));
        orch.init().unwrap();
        assert!(matches!(orch.init(), Err(SynthError::InvalidState { .. })));
        orch.scale_out().unwrap();
        orch.attach().unwrap();
        assert_eq!(orch.state(), OrchestratorState::Run);
    }

    #[test]
    fn test_pause_blocks_gated_producer() {
        let (_dir, mut orch) = setup("pause", 1, 1);
        orch.start().unwrap();

        let gate = BufferGate::open(&orch.config().ring.gate_name()).unwrap();
        assert!(orch.pause_producers().unwrap());
        assert!(orch.producers_paused());
        assert!(!gate.try_pass().unwrap());

        orch.resume_producers().unwrap();
        assert!(!orch.producers_paused());
        assert!(gate.try_pass().unwrap());
    }

    #[test]
    fn test_drop_cleans_up() {
        let (_dir, mut orch) = setup("drop", 1, 1);
        orch.start().unwrap();
        let segment = orch.config().ring.segment_path();
        let gate_name = orch.config().ring.gate_name();
        drop(orch);
        assert!(!segment.exists());
        assert!(BufferGate::open(&gate_name).is_err());
    }

    #[test]
    fn test_samples_iterator_yields_in_order() {
        let (_dir, mut orch) = setup("iter", 1, 1);
        orch.start().unwrap();

        let mut producer = local_producer(orch.config());
        for i in 0..10 {
            let caption = format!("s{i}");
            producer.publish(&Sample::new(2, &caption, vec![0u8; 4]).unwrap()).unwrap();
        }

        let captions: Vec<String> = orch
            .samples()
            .take(10)
            .map(|s| s.unwrap().caption.to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
        assert_eq!(captions, expected);
    }
}
