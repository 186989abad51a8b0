//! Target abstraction
//!
//! A port owns everything the portable kernel cannot express: per-thread
//! stacks, the register-save layout, the periodic timer and the mechanism
//! that forces a switch. The kernel in turn exposes its scheduling hooks to
//! the port through [`ContextSwitch`].

use rtos_core::{Quantum, RResult, ThreadEntry, ThreadId};

/// Scheduling hooks the kernel provides to its port
pub trait ContextSwitch<C>: Sync {
    /// Account for one timer tick. Called from the tick interrupt, before
    /// the port requests the switch.
    fn on_tick(&self);

    /// Record `saved` as the running thread's context, pick the next thread
    /// and return the context to resume.
    ///
    /// Must run with preemption masked. Never returns to a thread that is
    /// blocked or sleeping; if nothing can run and there is no idle thread
    /// this is a kernel fault.
    fn switch_context(&self, saved: C) -> C;
}

/// A target that can run kernel threads
pub trait Port: Sync + Sized + 'static {
    /// Saved execution context of a thread that is not running
    type Context: Copy + Send;

    /// Prepare a thread so that its first resumption enters `entry` with
    /// every register in a defined state.
    fn init_context(&self, id: ThreadId, entry: ThreadEntry) -> RResult<Self::Context>;

    /// Start the periodic tick at `quantum` and resume the first thread.
    fn start_first(
        &'static self,
        kernel: &'static dyn ContextSwitch<Self::Context>,
        first: Self::Context,
        quantum: Quantum,
    ) -> !;

    /// Switch away from the running thread as soon as possible, without
    /// waiting for the next tick.
    fn request_switch(&self);
}
