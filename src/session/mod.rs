//! Mining session: `Idle -> Running <-> Paused -> Idle`, plus `Error`.
//!
//! The iteration loop runs on its own thread and owns the device resources
//! while it runs. Halting the loop hands the resources back through the
//! join handle, so a paused session resumes on the same buffers. Progress
//! is published after every iteration to a latest-snapshot cell and to a
//! bounded channel that drops its oldest entry when no one is reading.

pub mod estimator;

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, trace, warn};

use crate::backend::DeviceProvider;
use crate::crypto::{AddressDeriver, SafeSetup};
use crate::error::{MinerError, Result};
use crate::search::{
    promote, verify, BestResult, IterationOutcome, SearchOrchestrator, SearchResources,
};
use crate::wallet::WalletConfig;

pub use estimator::{Estimate, EstimatorConfig, ProbabilityEstimator};

/// Undelivered progress updates kept for slow or absent readers.
pub const PROGRESS_BACKLOG: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session knobs.
#[derive(Debug, Clone)]
pub struct MiningOptions {
    /// First iteration index; earlier nonce ranges are skipped.
    pub start_iteration: u32,
    /// End the session once the best address has this many leading zero
    /// nibbles.
    pub stop_at_zero_nibbles: Option<u32>,
    /// How long `stop` lets an in-flight dispatch fail before it blocks on
    /// the loop thread.
    pub teardown_grace: Duration,
    pub estimator: EstimatorConfig,
}

impl Default for MiningOptions {
    fn default() -> Self {
        Self {
            start_iteration: 0,
            stop_at_zero_nibbles: None,
            teardown_grace: Duration::from_millis(100),
            estimator: EstimatorConfig::default(),
        }
    }
}

/// Snapshot of a session, published after every iteration and on every
/// state transition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Progress {
    pub state: SessionState,
    /// Next iteration index to dispatch.
    pub iteration: u32,
    pub total_hashes: u64,
    /// Hashes per second of active mining time.
    pub hashrate: f64,
    /// Active mining time of completed iterations; paused time is not
    /// counted.
    pub elapsed: Duration,
    pub best: Option<BestResult>,
    pub estimate: Option<Estimate>,
    pub error: Option<MinerError>,
}

impl Progress {
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == SessionState::Paused
    }

    pub fn best_zero_nibbles(&self) -> Option<u32> {
        self.best.map(|b| b.address().leading_zero_nibbles())
    }
}

struct Shared {
    halt: AtomicBool,
    stopping: AtomicBool,
    latest: Mutex<Progress>,
    tx: Sender<Progress>,
    rx: Receiver<Progress>,
}

impl Shared {
    fn latest(&self) -> Progress {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, progress: Progress) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = progress.clone();
        let mut pending = progress;
        // Evict the oldest update until the newest one fits. Shared holds a
        // receiver, so the channel never disconnects.
        while let Err(TrySendError::Full(p)) = self.tx.try_send(pending) {
            let _ = self.rx.try_recv();
            pending = p;
        }
    }

    fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    fn update(&self, f: impl FnOnce(&mut Progress)) {
        let mut progress = self.latest();
        f(&mut progress);
        self.publish(progress);
    }
}

/// Requests a stop from another thread (e.g. a Ctrl-C handler). The
/// session still has to be driven to `Idle` with [`MiningSession::stop`]
/// or by polling [`MiningSession::state`].
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.halt.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }
}

/// Everything the iteration loop owns between dispatches.
struct LoopState {
    resources: SearchResources,
    setup: SafeSetup,
    next_iteration: u32,
    iterations_done: u64,
    best: Option<BestResult>,
    active: Duration,
    estimator: ProbabilityEstimator,
    stop_at: Option<u32>,
}

impl LoopState {
    fn total_hashes(&self) -> u64 {
        self.iterations_done
            .saturating_mul(self.resources.items_per_dispatch())
    }

    fn progress(&mut self, state: SessionState) -> Progress {
        let total_hashes = self.total_hashes();
        let secs = self.active.as_secs_f64();
        let hashrate = if secs > 0.0 {
            total_hashes as f64 / secs
        } else {
            0.0
        };
        let best_zero_nibbles = self.best.map(|b| b.address().leading_zero_nibbles());
        let estimate = self.estimator.update(best_zero_nibbles, total_hashes, hashrate);
        Progress {
            state,
            iteration: self.next_iteration,
            total_hashes,
            hashrate,
            elapsed: self.active,
            best: self.best,
            estimate: Some(estimate),
            error: None,
        }
    }

    fn target_reached(&self) -> bool {
        match (self.stop_at, self.best) {
            (Some(target), Some(best)) => best.address().leading_zero_nibbles() >= target,
            _ => false,
        }
    }
}

enum LoopExit {
    /// Halted on request; resources handed back.
    Halted(Box<LoopState>),
    /// Ended by itself; resources already released.
    Finished,
    Failed(MinerError),
    Panicked,
}

/// The iteration loop. One dispatch at a time; `halt` is checked before
/// each dispatch and before each blocking device wait.
fn mine(mut state: LoopState, shared: &Shared) -> LoopExit {
    let resumed_at = Instant::now();
    let active_before = state.active;

    loop {
        let outcome = SearchOrchestrator::run_once(
            &mut state.resources,
            state.next_iteration,
            &shared.halt,
        );

        // A cancelled iteration is re-dispatched on resume, so neither its
        // time nor its hashes count.
        let raw = match outcome {
            Ok(IterationOutcome::Completed(raw)) => raw,
            Ok(IterationOutcome::Cancelled) => return LoopExit::Halted(Box::new(state)),
            Err(e) if e.is_device_lost() && shared.stopping.load(Ordering::Acquire) => {
                warn!("Ignoring error from dispatch in flight during stop: {}", e);
                return LoopExit::Halted(Box::new(state));
            }
            Err(e) => {
                warn!("Iteration {} failed: {}", state.next_iteration, e);
                state.active = active_before + resumed_at.elapsed();
                let mut progress = state.progress(SessionState::Error);
                progress.error = Some(e.clone());
                drop(state);
                shared.publish(progress);
                return LoopExit::Failed(e);
            }
        };
        state.active = active_before + resumed_at.elapsed();

        let previous = state.best;
        state.best = promote(previous, verify(&state.setup, &raw));
        if state.best != previous {
            if let Some(best) = state.best {
                info!(
                    "New best {} ({} zero nibbles) at nonce {}",
                    best.address(),
                    best.address().leading_zero_nibbles(),
                    best.nonce()
                );
            }
        }

        state.iterations_done += 1;
        let exhausted = match state.next_iteration.checked_add(1) {
            Some(next) => {
                state.next_iteration = next;
                false
            }
            None => true,
        };

        let progress = state.progress(SessionState::Running);
        trace!(
            "Iteration {} done, {} hashes, {:.0} H/s",
            progress.iteration,
            progress.total_hashes,
            progress.hashrate
        );

        if state.target_reached() || exhausted {
            if exhausted {
                info!("Iteration range exhausted");
            } else {
                info!("Target reached, ending session");
            }
            let mut last = progress;
            last.state = SessionState::Idle;
            drop(state);
            shared.publish(last);
            return LoopExit::Finished;
        }
        shared.publish(progress);
    }
}

enum Phase {
    Idle,
    Running {
        handle: JoinHandle<LoopExit>,
        done_rx: Receiver<()>,
    },
    Paused(Box<LoopState>),
    Error(MinerError),
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Running { .. } => SessionState::Running,
            Phase::Paused(_) => SessionState::Paused,
            Phase::Error(_) => SessionState::Error,
        }
    }
}

/// Drives the search for one wallet config at a time.
pub struct MiningSession {
    provider: Arc<dyn DeviceProvider>,
    deriver: AddressDeriver,
    options: MiningOptions,
    phase: Phase,
    shared: Arc<Shared>,
}

impl MiningSession {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        deriver: AddressDeriver,
        options: MiningOptions,
    ) -> Self {
        let (tx, rx) = bounded(PROGRESS_BACKLOG);
        Self {
            provider,
            deriver,
            options,
            phase: Phase::Idle,
            shared: Arc::new(Shared {
                halt: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                latest: Mutex::new(Progress::default()),
                tx,
                rx,
            }),
        }
    }

    pub fn options(&self) -> &MiningOptions {
        &self.options
    }

    /// Current state. Settles a loop that ended on its own.
    pub fn state(&mut self) -> SessionState {
        self.reap();
        self.phase.state()
    }

    pub fn snapshot(&self) -> Progress {
        self.shared.latest()
    }

    /// Progress stream. Receivers share one queue of at most
    /// [`PROGRESS_BACKLOG`] updates; older ones are dropped first.
    pub fn progress(&self) -> Receiver<Progress> {
        self.shared.rx.clone()
    }

    pub fn best(&self) -> Option<BestResult> {
        self.shared.latest().best
    }

    pub fn last_error(&self) -> Option<MinerError> {
        match &self.phase {
            Phase::Error(e) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Starts a fresh search for `config`. Valid from `Idle` and `Error`.
    pub fn start(&mut self, config: &WalletConfig) -> Result<()> {
        self.reap();
        if let Phase::Running { .. } | Phase::Paused(_) = self.phase {
            return Err(self.invalid("start"));
        }
        let config = WalletConfig::new(config.owners().to_vec(), config.threshold())?;

        self.shared.drain();
        self.shared.halt.store(false, Ordering::Release);
        self.shared.stopping.store(false, Ordering::Release);
        self.shared.publish(Progress {
            iteration: self.options.start_iteration,
            ..Progress::default()
        });

        let setup = self.deriver.prepare(&config);
        info!(
            "Starting session: {} owner(s), threshold {}, initializer hash 0x{}",
            config.owners().len(),
            config.threshold(),
            hex::encode(setup.initializer_hash())
        );

        let resources = match SearchOrchestrator::prepare(self.provider.as_ref(), &setup) {
            Ok(resources) => resources,
            Err(e) => {
                self.fail(e.clone());
                return Err(e);
            }
        };

        let state = LoopState {
            resources,
            setup,
            next_iteration: self.options.start_iteration,
            iterations_done: 0,
            best: None,
            active: Duration::ZERO,
            estimator: ProbabilityEstimator::new(self.options.estimator),
            stop_at: self.options.stop_at_zero_nibbles,
        };
        self.spawn(state)
    }

    /// Halts the loop and releases all device resources. Always ends in
    /// `Idle`; from `Error` it clears the error.
    pub fn stop(&mut self) -> Result<()> {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Running { handle, done_rx } => {
                info!("Stopping session");
                self.stop_handle().request_stop();
                match self.join_loop(handle, done_rx) {
                    LoopExit::Failed(e) => warn!("Session failed while stopping: {}", e),
                    LoopExit::Panicked => warn!("Mining thread panicked while stopping"),
                    LoopExit::Halted(state) => drop(state),
                    LoopExit::Finished => {}
                }
            }
            Phase::Paused(state) => {
                info!("Stopping paused session");
                drop(state);
            }
            Phase::Error(e) => debug!("Clearing session error: {}", e),
            Phase::Idle => return Err(self.invalid("stop")),
        }
        self.shared.update(|p| {
            p.state = SessionState::Idle;
            p.error = None;
        });
        Ok(())
    }

    /// Halts the loop but keeps the device resources for `resume`.
    pub fn pause(&mut self) -> Result<()> {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Running { handle, done_rx } => {
                self.shared.halt.store(true, Ordering::Release);
                let exit = self.join_loop(handle, done_rx);
                self.settle(exit);
                match &self.phase {
                    Phase::Paused(_) => {
                        info!("Session paused");
                        Ok(())
                    }
                    Phase::Error(e) => Err(e.clone()),
                    _ => Err(self.invalid("pause")),
                }
            }
            other => {
                self.phase = other;
                Err(self.invalid("pause"))
            }
        }
    }

    /// Continues a paused session on the same resources. A stop requested
    /// while paused wins: the session settles to `Idle` instead.
    pub fn resume(&mut self) -> Result<()> {
        self.reap();
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Paused(state) => {
                info!("Resuming at iteration {}", state.next_iteration);
                self.shared.halt.store(false, Ordering::Release);
                if self.shared.stopping.load(Ordering::Acquire) {
                    // Raced a request_stop; the loop halts on its first check.
                    self.shared.halt.store(true, Ordering::Release);
                }
                self.spawn(*state)
            }
            other => {
                self.phase = other;
                Err(self.invalid("resume"))
            }
        }
    }

    /// Blocks until the loop ends by itself or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> SessionState {
        let ended = match &self.phase {
            Phase::Running { done_rx, .. } => matches!(
                done_rx.recv_timeout(timeout),
                Err(RecvTimeoutError::Disconnected)
            ),
            _ => false,
        };
        if ended {
            if let Phase::Running { handle, done_rx } = mem::replace(&mut self.phase, Phase::Idle) {
                let exit = self.join_loop(handle, done_rx);
                self.settle(exit);
            }
        }
        self.state()
    }

    fn invalid(&self, op: &'static str) -> MinerError {
        MinerError::InvalidState {
            op,
            state: self.phase.state().as_str(),
        }
    }

    fn fail(&mut self, e: MinerError) {
        warn!("Session error: {}", e);
        self.shared.update(|p| {
            p.state = SessionState::Error;
            p.error = Some(e.clone());
        });
        self.phase = Phase::Error(e);
    }

    fn spawn(&mut self, state: LoopState) -> Result<()> {
        self.shared.update(|p| {
            p.state = SessionState::Running;
            p.error = None;
        });

        let shared = self.shared.clone();
        let (done_tx, done_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("safe-miner-session".into())
            .spawn(move || {
                let exit = mine(state, &shared);
                drop(done_tx);
                exit
            });

        match spawned {
            Ok(handle) => {
                self.phase = Phase::Running { handle, done_rx };
                Ok(())
            }
            Err(e) => {
                let err = MinerError::DispatchFailed(format!("spawning mining thread: {}", e));
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Gives an in-flight dispatch `teardown_grace` to finish or fail,
    /// then joins the loop thread.
    fn join_loop(&self, handle: JoinHandle<LoopExit>, done_rx: Receiver<()>) -> LoopExit {
        if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(self.options.teardown_grace) {
            debug!("Waiting for in-flight dispatch to drain");
        }
        handle.join().unwrap_or(LoopExit::Panicked)
    }

    /// Settles a loop that ended on its own, or a paused session whose
    /// stop was requested through a [`StopHandle`].
    fn reap(&mut self) {
        let stopping = self.shared.stopping.load(Ordering::Acquire);
        let ready = match &self.phase {
            Phase::Running { handle, .. } => handle.is_finished(),
            Phase::Paused(_) => stopping,
            _ => false,
        };
        if !ready {
            return;
        }
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Running { handle, done_rx } => {
                let exit = self.join_loop(handle, done_rx);
                self.settle(exit);
            }
            Phase::Paused(state) => self.settle(LoopExit::Halted(state)),
            other => self.phase = other,
        }
    }

    fn settle(&mut self, exit: LoopExit) {
        match exit {
            LoopExit::Halted(state) if self.shared.stopping.load(Ordering::Acquire) => {
                info!("Session stopped");
                drop(state);
                self.phase = Phase::Idle;
                self.shared.update(|p| p.state = SessionState::Idle);
            }
            LoopExit::Halted(state) => {
                self.phase = Phase::Paused(state);
                self.shared.update(|p| p.state = SessionState::Paused);
            }
            LoopExit::Finished => self.phase = Phase::Idle,
            LoopExit::Failed(e) => self.phase = Phase::Error(e),
            LoopExit::Panicked => self.fail(MinerError::DispatchFailed(
                "mining thread panicked".into(),
            )),
        }
    }
}

impl Drop for MiningSession {
    fn drop(&mut self) {
        if let Phase::Running { handle, done_rx } = mem::replace(&mut self.phase, Phase::Idle) {
            self.stop_handle().request_stop();
            let _ = self.join_loop(handle, done_rx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        ComputeDevice, CpuDevice, DispatchGeometry, DispatchParams, KernelConstants, RESULT_WORDS,
    };
    use crate::nonce::SaltNonce;
    use std::sync::atomic::AtomicUsize;

    const OWNER: &str = "0xB5856d4598c919834913b8656ebc15a64d3C7836";

    fn config() -> WalletConfig {
        WalletConfig::parse(OWNER, 1).unwrap()
    }

    #[derive(Clone)]
    enum Fault {
        None,
        LostAtRead(usize),
        ShortReadAt(usize),
        /// First `wait_idle` blocks until the gate opens, then reports
        /// the device as lost.
        LostAfterGate(Receiver<()>),
        /// First dispatch signals on entry, then takes `Duration`.
        SlowFirstDispatch(Sender<()>, Duration),
    }

    #[derive(Clone)]
    struct Script {
        fault: Fault,
        geometry: DispatchGeometry,
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl Script {
        fn new(fault: Fault) -> Self {
            Self {
                fault,
                geometry: DispatchGeometry::new(16, 2, 1),
                acquired: Arc::new(AtomicUsize::new(0)),
                released: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn provider(&self) -> Arc<dyn DeviceProvider> {
            let script = self.clone();
            Arc::new(move || -> Result<Box<dyn ComputeDevice>> {
                script.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedDevice {
                    inner: CpuDevice::new(1, script.geometry)?,
                    script: script.clone(),
                    reads: 0,
                    dispatches: 0,
                }))
            })
        }
    }

    struct ScriptedDevice {
        inner: CpuDevice,
        script: Script,
        reads: usize,
        dispatches: usize,
    }

    impl ComputeDevice for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }
        fn geometry(&self) -> DispatchGeometry {
            self.inner.geometry()
        }
        fn allocate(&mut self, constants: &KernelConstants) -> Result<()> {
            self.inner.allocate(constants)
        }
        fn seed_results(&mut self, words: &[u32; RESULT_WORDS]) -> Result<()> {
            self.inner.seed_results(words)
        }
        fn write_params(&mut self, params: &DispatchParams) -> Result<()> {
            self.inner.write_params(params)
        }
        fn dispatch(&mut self) -> Result<()> {
            self.dispatches += 1;
            if let Fault::SlowFirstDispatch(entered, delay) = &self.script.fault {
                if self.dispatches == 1 {
                    let _ = entered.send(());
                    std::thread::sleep(*delay);
                }
            }
            self.inner.dispatch()
        }
        fn wait_idle(&mut self) -> Result<()> {
            if let Fault::LostAfterGate(gate) = &self.script.fault {
                let _ = gate.recv();
                return Err(MinerError::DeviceLost("queue destroyed".into()));
            }
            self.inner.wait_idle()
        }
        fn read_results(&mut self) -> Result<Vec<u8>> {
            self.reads += 1;
            match self.script.fault {
                Fault::LostAtRead(n) if self.reads == n => {
                    Err(MinerError::DeviceLost("adapter reset".into()))
                }
                Fault::ShortReadAt(n) if self.reads == n => Ok(vec![0u8; 12]),
                _ => self.inner.read_results(),
            }
        }
        fn release(&mut self) {
            self.script.released.fetch_add(1, Ordering::SeqCst);
            self.inner.release();
        }
    }

    fn session(script: &Script, options: MiningOptions) -> MiningSession {
        MiningSession::new(script.provider(), AddressDeriver::default(), options)
    }

    fn wait_for_iterations(rx: &Receiver<Progress>, n: u64) -> Progress {
        loop {
            let p = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("progress stream stalled");
            if p.total_hashes >= n * 32 {
                return p;
            }
        }
    }

    #[test]
    fn test_runs_to_target_on_cpu() {
        let script = Script::new(Fault::None);
        let mut s = session(
            &script,
            MiningOptions {
                stop_at_zero_nibbles: Some(2),
                ..Default::default()
            },
        );
        s.start(&config()).unwrap();
        assert_eq!(s.wait(Duration::from_secs(30)), SessionState::Idle);

        let best = s.best().unwrap();
        assert!(best.address().leading_zero_nibbles() >= 2);
        let derived = AddressDeriver::default().derive(&config(), &best.nonce());
        assert_eq!(derived.address, best.address());
        assert_eq!(script.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_is_monotonic_and_finite() {
        let script = Script::new(Fault::None);
        let mut s = session(&script, MiningOptions::default());
        let rx = s.progress();
        s.start(&config()).unwrap();
        wait_for_iterations(&rx, 20);
        s.stop().unwrap();

        let mut best: Option<BestResult> = None;
        let mut hashes = 0;
        for p in rx.try_iter() {
            assert!(p.hashrate >= 0.0 && p.hashrate.is_finite());
            assert!(p.total_hashes >= hashes);
            hashes = p.total_hashes;
            if let (Some(prev), Some(cur)) = (best, p.best) {
                assert!(cur.address() <= prev.address());
            }
            best = p.best.or(best);
        }
    }

    #[test]
    fn test_stop_releases_and_goes_idle() {
        let script = Script::new(Fault::None);
        let mut s = session(&script, MiningOptions::default());
        let rx = s.progress();
        s.start(&config()).unwrap();
        wait_for_iterations(&rx, 3);

        s.stop().unwrap();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(script.released.load(Ordering::SeqCst), 1);
        assert!(s.snapshot().best.is_some());
        assert!(matches!(
            s.stop(),
            Err(MinerError::InvalidState { op: "stop", .. })
        ));
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let script = Script::new(Fault::None);
        let mut s = session(&script, MiningOptions::default());
        s.start(&config()).unwrap();
        assert!(matches!(
            s.start(&config()),
            Err(MinerError::InvalidState {
                op: "start",
                state: "running"
            })
        ));
        s.stop().unwrap();
    }

    #[test]
    fn test_pause_resume_reuses_resources() {
        let script = Script::new(Fault::None);
        let mut s = session(&script, MiningOptions::default());
        let rx = s.progress();
        s.start(&config()).unwrap();
        wait_for_iterations(&rx, 2);

        s.pause().unwrap();
        assert_eq!(s.state(), SessionState::Paused);
        let paused = s.snapshot();
        assert!(paused.is_paused());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(s.snapshot().total_hashes, paused.total_hashes);

        s.resume().unwrap();
        let later = wait_for_iterations(&rx, paused.total_hashes / 32 + 2);
        assert!(later.iteration > paused.iteration);
        s.stop().unwrap();

        assert_eq!(script.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(script.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_lost_during_stop_is_swallowed() {
        let (gate_tx, gate_rx) = bounded(1);
        let script = Script::new(Fault::LostAfterGate(gate_rx));
        let mut s = session(&script, MiningOptions::default());
        s.start(&config()).unwrap();

        s.stop_handle().request_stop();
        gate_tx.send(()).unwrap();
        s.stop().unwrap();

        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.snapshot().error, None);
        assert_eq!(script.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_lost_while_running_is_an_error() {
        let script = Script::new(Fault::LostAtRead(3));
        let mut s = session(&script, MiningOptions::default());
        s.start(&config()).unwrap();

        assert_eq!(s.wait(Duration::from_secs(10)), SessionState::Error);
        assert!(matches!(s.last_error(), Some(MinerError::DeviceLost(_))));
        let snapshot = s.snapshot();
        assert_eq!(snapshot.total_hashes, 2 * 32);
        assert!(matches!(snapshot.error, Some(MinerError::DeviceLost(_))));
        assert_eq!(script.released.load(Ordering::SeqCst), 1);

        // Recoverable only through a fresh start.
        assert!(s.resume().is_err());
        s.stop().unwrap();
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_decode_error_halts_session() {
        let script = Script::new(Fault::ShortReadAt(1));
        let mut s = session(&script, MiningOptions::default());
        s.start(&config()).unwrap();
        assert_eq!(s.wait(Duration::from_secs(10)), SessionState::Error);
        assert!(matches!(s.last_error(), Some(MinerError::DecodeError(_))));
    }

    #[test]
    fn test_unavailable_device_fails_start() {
        let provider: Arc<dyn DeviceProvider> = Arc::new(|| -> Result<Box<dyn ComputeDevice>> {
            Err(MinerError::GpuUnavailable("no adapter".into()))
        });
        let mut s = MiningSession::new(provider, AddressDeriver::default(), MiningOptions::default());
        assert!(matches!(
            s.start(&config()),
            Err(MinerError::GpuUnavailable(_))
        ));
        assert_eq!(s.state(), SessionState::Error);
        assert!(matches!(s.snapshot().error, Some(MinerError::GpuUnavailable(_))));
        assert!(!s.snapshot().is_running());
    }

    #[test]
    fn test_restart_reacquires_and_replays_range() {
        let script = Script::new(Fault::None);
        let mut s = session(
            &script,
            MiningOptions {
                start_iteration: 1_000,
                stop_at_zero_nibbles: Some(1),
                ..Default::default()
            },
        );
        s.start(&config()).unwrap();
        assert_eq!(s.wait(Duration::from_secs(10)), SessionState::Idle);
        let first = s.best().unwrap();
        assert!(first.nonce() >= SaltNonce::from(32_000));

        s.start(&config()).unwrap();
        assert_eq!(s.wait(Duration::from_secs(10)), SessionState::Idle);
        assert_eq!(s.best(), Some(first));
        assert_eq!(script.acquired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unread_progress_stream_stays_bounded() {
        let script = Script::new(Fault::None);
        let mut s = session(&script, MiningOptions::default());
        s.start(&config()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while s.snapshot().total_hashes < 4 * PROGRESS_BACKLOG as u64 * 32 {
            assert!(Instant::now() < deadline, "session made no progress");
            std::thread::sleep(Duration::from_millis(5));
        }
        let rx = s.progress();
        assert!(rx.len() <= PROGRESS_BACKLOG);

        s.stop().unwrap();
        assert!(rx.len() <= PROGRESS_BACKLOG);
        let last = rx.try_iter().last().unwrap();
        assert_eq!(last.state, SessionState::Idle);
    }

    #[test]
    fn test_stop_requested_while_paused_settles_idle() {
        let script = Script::new(Fault::None);
        let mut s = session(&script, MiningOptions::default());
        let rx = s.progress();
        s.start(&config()).unwrap();
        wait_for_iterations(&rx, 1);
        s.pause().unwrap();

        let stop = s.stop_handle();
        stop.request_stop();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.snapshot().state, SessionState::Idle);
        assert_eq!(script.released.load(Ordering::SeqCst), 1);
        assert!(matches!(
            s.resume(),
            Err(MinerError::InvalidState { op: "resume", .. })
        ));

        s.start(&config()).unwrap();
        assert!(!stop.is_stop_requested());
        s.stop().unwrap();
    }

    #[test]
    fn test_resume_after_stop_request_does_not_swallow_device_lost() {
        let script = Script::new(Fault::LostAtRead(1));
        let mut s = session(&script, MiningOptions::default());
        s.phase = Phase::Paused(Box::new(LoopState {
            resources: SearchOrchestrator::prepare(
                script.provider().as_ref(),
                &AddressDeriver::default().prepare(&config()),
            )
            .unwrap(),
            setup: AddressDeriver::default().prepare(&config()),
            next_iteration: 0,
            iterations_done: 0,
            best: None,
            active: Duration::ZERO,
            estimator: ProbabilityEstimator::new(EstimatorConfig::default()),
            stop_at: None,
        }));

        s.stop_handle().request_stop();
        assert!(s.resume().is_err());
        assert_eq!(s.state(), SessionState::Idle);

        s.start(&config()).unwrap();
        assert_eq!(s.wait(Duration::from_secs(10)), SessionState::Error);
        assert!(matches!(s.last_error(), Some(MinerError::DeviceLost(_))));
    }

    #[test]
    fn test_cancelled_iteration_time_is_not_counted() {
        let delay = Duration::from_millis(300);
        let (entered_tx, entered_rx) = bounded(1);
        let script = Script::new(Fault::SlowFirstDispatch(entered_tx, delay));
        let mut s = session(&script, MiningOptions::default());
        let rx = s.progress();
        s.start(&config()).unwrap();

        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        s.pause().unwrap();
        assert_eq!(s.snapshot().total_hashes, 0);
        assert_eq!(s.snapshot().elapsed, Duration::ZERO);

        s.resume().unwrap();
        let p = wait_for_iterations(&rx, 1);
        s.stop().unwrap();
        assert!(p.elapsed < delay, "elapsed {:?}", p.elapsed);
    }
}
