//! Host simulator port.
//!
//! Runs each kernel thread on its own OS thread, but lets exactly one of
//! them execute at a time: the scheduler hands a baton from thread to thread
//! at every switch. Time is simulated. Thread code calls
//! [`preemption_point`] where an interrupt could land, and every `quantum`
//! such calls count as one timer tick followed by a switch. Runs are
//! therefore deterministic for a given placement of preemption points.
//!
//! A run ends when a thread calls [`halt`], when the optional step budget is
//! exhausted, or when a thread faults (panics). The remaining threads are
//! unwound and joined, and [`run`] returns a [`SimReport`].

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use rtos_kernel::{
    fault, ContextSwitch, Kernel, KernelError, Port, Quantum, RResult, ThreadEntry, ThreadId,
};

/// Saved context of a simulated thread: which OS thread to hand the baton to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContext(pub ThreadId);

/// Why a simulation stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// A thread called [`halt`]
    Requested,
    /// The configured number of scheduling points was reached
    StepBudget,
    /// A thread panicked, including kernel faults
    Fault(String),
}

/// Outcome of a finished simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimReport {
    pub reason: HaltReason,
    /// Scheduling points passed: preemption points and explicit switches
    pub steps: u64,
    /// Simulated timer ticks
    pub ticks: u64,
}

impl SimReport {
    pub fn is_fault(&self) -> bool {
        matches!(self.reason, HaltReason::Fault(_))
    }
}

/// Unwind payload used to stop simulated threads
struct Halted;

struct SimState {
    entries: Vec<(ThreadId, ThreadEntry)>,
    running: Option<ThreadId>,
    halted: Option<HaltReason>,
    steps: u64,
    ticks: u64,
    quantum: u32,
    countdown: u32,
}

/// Port that runs kernel threads on host OS threads
pub struct HostPort {
    state: Mutex<SimState>,
    baton: Condvar,
    kernel: OnceLock<&'static dyn ContextSwitch<HostContext>>,
    step_budget: Option<u64>,
}

thread_local! {
    static CURRENT: Cell<Option<(&'static HostPort, ThreadId)>> = const { Cell::new(None) };
}

impl HostPort {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                entries: Vec::new(),
                running: None,
                halted: None,
                steps: 0,
                ticks: 0,
                quantum: 1,
                countdown: 1,
            }),
            baton: Condvar::new(),
            kernel: OnceLock::new(),
            step_budget: None,
        }
    }

    /// Stop the run with [`HaltReason::StepBudget`] after `steps` scheduling
    /// points.
    pub const fn with_step_budget(steps: u64) -> Self {
        let mut port = Self::new();
        port.step_budget = Some(steps);
        port
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking simulated thread never holds this lock.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stop(&self, state: &mut SimState, reason: HaltReason) {
        if state.halted.is_none() {
            info!("simulation halting: {:?}", reason);
            state.halted = Some(reason);
        }
        state.running = None;
        self.baton.notify_all();
    }

    /// Count one scheduling point. Unwinds the caller if the run is over.
    fn step(&self) -> MutexGuard<'_, SimState> {
        let mut state = self.lock();
        if state.halted.is_none() {
            state.steps += 1;
            if self.step_budget.is_some_and(|budget| state.steps >= budget) {
                self.stop(&mut state, HaltReason::StepBudget);
            }
        }
        if state.halted.is_some() {
            drop(state);
            panic::resume_unwind(Box::new(Halted));
        }
        state
    }

    /// Block until `id` holds the baton. Returns false if the run ended
    /// first.
    fn await_baton(&self, mut state: MutexGuard<'_, SimState>, id: ThreadId) -> bool {
        while state.running != Some(id) && state.halted.is_none() {
            state = self
                .baton
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.halted.is_none()
    }

    fn hand_over(&self, from: ThreadId, to: ThreadId) {
        let mut state = self.lock();
        state.running = Some(to);
        self.baton.notify_all();
        if !self.await_baton(state, from) {
            panic::resume_unwind(Box::new(Halted));
        }
    }

    fn preempt(&'static self, id: ThreadId) {
        let tick = {
            let mut state = self.step();
            state.countdown -= 1;
            if state.countdown == 0 {
                state.countdown = state.quantum;
                state.ticks += 1;
                true
            } else {
                false
            }
        };
        if tick {
            if let Some(kernel) = self.kernel.get() {
                kernel.on_tick();
            }
            self.switch_from(id);
        }
    }

    fn switch_from(&self, id: ThreadId) {
        let Some(kernel) = self.kernel.get() else {
            return;
        };
        let HostContext(next) = kernel.switch_context(HostContext(id));
        if next != id {
            self.hand_over(id, next);
        }
    }

    fn spawn(&'static self, id: ThreadId, entry: ThreadEntry) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("rtos-{}", id.raw()))
            .spawn(move || {
                CURRENT.with(|current| current.set(Some((self, id))));
                if !self.await_baton(self.lock(), id) {
                    return;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    entry();
                }));
                if let Err(payload) = outcome {
                    if !payload.is::<Halted>() {
                        let message = panic_message(payload.as_ref());
                        warn!("{} faulted: {}", id, message);
                        let mut state = self.lock();
                        self.stop(&mut state, HaltReason::Fault(message));
                    }
                }
            })
    }

    /// Spawn every registered thread, hand the baton to `first` and wait for
    /// the run to end.
    fn simulate(
        &'static self,
        kernel: &'static dyn ContextSwitch<HostContext>,
        first: HostContext,
        quantum: Quantum,
    ) -> RResult<SimReport> {
        self.kernel
            .set(kernel)
            .map_err(|_| KernelError::AlreadyLaunched)?;

        let entries = {
            let mut state = self.lock();
            state.quantum = quantum.cycles();
            state.countdown = quantum.cycles();
            state.entries.clone()
        };
        info!(
            "simulating {} threads, {} preemption points per tick",
            entries.len(),
            quantum.cycles()
        );

        let mut handles = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            match self.spawn(id, entry) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    let mut state = self.lock();
                    self.stop(&mut state, HaltReason::Fault(err.to_string()));
                }
            }
        }

        let report = {
            let mut state = self.lock();
            if state.halted.is_none() {
                state.running = Some(first.0);
                self.baton.notify_all();
            }
            while state.halted.is_none() {
                state = self
                    .baton
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            SimReport {
                reason: state.halted.clone().unwrap_or(HaltReason::Requested),
                steps: state.steps,
                ticks: state.ticks,
            }
        };

        for handle in handles {
            if handle.join().is_err() {
                debug!("simulated thread exited by panic");
            }
        }
        info!("simulation finished after {} steps", report.steps);
        Ok(report)
    }
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for HostPort {
    type Context = HostContext;

    fn init_context(&self, id: ThreadId, entry: ThreadEntry) -> RResult<HostContext> {
        let mut state = self.lock();
        state.entries.retain(|(existing, _)| *existing != id);
        state.entries.push((id, entry));
        debug!("prepared host thread for {}", id);
        Ok(HostContext(id))
    }

    fn start_first(
        &'static self,
        kernel: &'static dyn ContextSwitch<HostContext>,
        first: HostContext,
        quantum: Quantum,
    ) -> ! {
        match self.simulate(kernel, first, quantum) {
            Ok(report) if report.is_fault() => std::process::exit(1),
            Ok(_) => std::process::exit(0),
            Err(err) => fault(err),
        }
    }

    fn request_switch(&self) {
        let Some((port, id)) = CURRENT.with(Cell::get) else {
            return;
        };
        if !std::ptr::eq(port, self) {
            return;
        }
        drop(self.step());
        self.switch_from(id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

/// Launch `kernel` on its host port and run until the simulation halts.
///
/// Unlike [`Kernel::launch`] this returns, so tests can inspect the kernel
/// afterwards.
pub fn run<const N: usize>(
    kernel: &'static Kernel<HostPort, N>,
    quantum: Quantum,
) -> RResult<SimReport> {
    let first = kernel.begin_launch()?;
    kernel.port().simulate(kernel, first, quantum)
}

/// Mark a point where the simulated timer may interrupt the calling thread.
///
/// Does nothing outside a simulated thread.
pub fn preemption_point() {
    if let Some((port, id)) = CURRENT.with(Cell::get) {
        port.preempt(id);
    }
}

/// End the simulation from inside a simulated thread.
pub fn halt() -> ! {
    if let Some((port, _)) = CURRENT.with(Cell::get) {
        let mut state = port.lock();
        port.stop(&mut state, HaltReason::Requested);
    }
    panic::resume_unwind(Box::new(Halted))
}

/// Id of the simulated thread calling this, if any
pub fn current_thread() -> Option<ThreadId> {
    CURRENT.with(Cell::get).map(|(_, id)| id)
}
