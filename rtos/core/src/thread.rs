//! Thread descriptors

use crate::sema::SemaphoreId;
use crate::time::Ticks;

/// Thread entry point: no arguments, never returns.
pub type ThreadEntry = fn() -> !;

/// Thread number, also the index of the thread's slot in the registry and in
/// the port's stack arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u8);

impl ThreadId {
    /// Create a thread id from a raw slot number
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Get the raw slot number
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Slot index into per-thread arrays
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "thread#{}", self.0);
    }
}

/// Thread control block
///
/// `C` is the port's saved context: a stack pointer on target, a handle on
/// the host simulator. It is only meaningful while the thread is not
/// running.
#[derive(Debug, Clone)]
pub struct Tcb<C> {
    id: ThreadId,
    saved: C,
    next: ThreadId,
    blocked_on: Option<SemaphoreId>,
    sleep: Ticks,
}

impl<C: Copy> Tcb<C> {
    pub(crate) fn new(id: ThreadId, saved: C) -> Self {
        Self {
            id,
            saved,
            next: id,
            blocked_on: None,
            sleep: Ticks::ZERO,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Successor in the round-robin ring
    pub fn next(&self) -> ThreadId {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: ThreadId) {
        self.next = next;
    }

    /// Context saved by the last switch away from this thread
    pub fn saved_context(&self) -> C {
        self.saved
    }

    pub fn save_context(&mut self, context: C) {
        self.saved = context;
    }

    pub fn blocked_on(&self) -> Option<SemaphoreId> {
        self.blocked_on
    }

    pub(crate) fn block_on(&mut self, sema: SemaphoreId) {
        debug_assert!(self.blocked_on.is_none(), "{} already blocked", self.id);
        self.blocked_on = Some(sema);
    }

    pub(crate) fn unblock(&mut self) -> Option<SemaphoreId> {
        self.blocked_on.take()
    }

    pub fn sleep_ticks(&self) -> Ticks {
        self.sleep
    }

    /// Start sleeping for `ticks` scheduler ticks
    pub fn sleep_for(&mut self, ticks: u32) {
        self.sleep = Ticks::new(ticks);
    }

    pub(crate) fn elapse(&mut self, elapsed: u32) -> bool {
        self.sleep.elapse(elapsed)
    }

    /// A thread is runnable iff it is neither blocked nor sleeping.
    pub fn is_runnable(&self) -> bool {
        self.blocked_on.is_none() && self.sleep.is_zero()
    }

    pub fn status(&self, idle: bool) -> ThreadStatus {
        ThreadStatus {
            id: self.id,
            runnable: self.is_runnable(),
            blocked_on: self.blocked_on,
            sleep_ticks: self.sleep.ticks(),
            idle,
        }
    }
}

/// Point-in-time view of one thread's scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreadStatus {
    pub id: ThreadId,
    pub runnable: bool,
    pub blocked_on: Option<SemaphoreId>,
    pub sleep_ticks: u32,
    pub idle: bool,
}
