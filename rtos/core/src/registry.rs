//! Thread registry
//!
//! A fixed-capacity arena of thread control blocks indexed by [`ThreadId`].
//! Round-robin threads are linked into one circular list through each
//! block's stored successor id; the optional idle thread occupies a slot but
//! is never part of the ring.

use heapless::Vec;

use crate::thread::{Tcb, ThreadId, ThreadStatus};
use crate::{KernelError, RResult};

/// Registry of all threads known to a kernel instance
pub struct ThreadRegistry<C, const N: usize> {
    tcbs: Vec<Tcb<C>, N>,
    /// First and last members of the ring, in registration order
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    ring_len: usize,
    idle: Option<ThreadId>,
    current: Option<ThreadId>,
    /// Last ring member that was current; the ring walk resumes from here
    /// when the idle thread is running.
    anchor: Option<ThreadId>,
    sealed: bool,
}

impl<C: Copy, const N: usize> ThreadRegistry<C, N> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            tcbs: Vec::new(),
            head: None,
            tail: None,
            ring_len: 0,
            idle: None,
            current: None,
            anchor: None,
            sealed: false,
        }
    }

    fn allocate<F>(&mut self, init: F) -> RResult<ThreadId>
    where
        F: FnOnce(ThreadId) -> RResult<C>,
    {
        if self.sealed {
            return Err(KernelError::AlreadyLaunched);
        }
        if self.tcbs.is_full() {
            return Err(KernelError::RegistryFull { capacity: N });
        }

        // N is bounded by MAX_THREADS, so the slot number fits in a u8
        let id = ThreadId::new(self.tcbs.len() as u8);
        let saved = init(id)?;
        self.tcbs
            .push(Tcb::new(id, saved))
            .map_err(|_| KernelError::RegistryFull { capacity: N })?;
        Ok(id)
    }

    /// Register a round-robin thread and append it to the ring.
    ///
    /// `init` prepares the thread's initial context (its stack, on target)
    /// and runs only once a slot has been reserved.
    pub fn register<F>(&mut self, init: F) -> RResult<ThreadId>
    where
        F: FnOnce(ThreadId) -> RResult<C>,
    {
        let id = self.allocate(init)?;

        match self.tail {
            None => {
                self.head = Some(id);
            }
            Some(tail) => {
                let head = self.head.unwrap_or(id);
                self.tcbs[tail.index()].set_next(id);
                self.tcbs[id.index()].set_next(head);
            }
        }
        self.tail = Some(id);
        self.ring_len += 1;
        Ok(id)
    }

    /// Register the idle thread, which runs only when no ring member can.
    pub fn register_idle<F>(&mut self, init: F) -> RResult<ThreadId>
    where
        F: FnOnce(ThreadId) -> RResult<C>,
    {
        if self.idle.is_some() {
            return Err(KernelError::IdleAlreadySet);
        }
        let id = self.allocate(init)?;
        self.idle = Some(id);
        Ok(id)
    }

    /// Drop every thread registered after the first `len`, relinking the
    /// ring over the ones that remain. Does nothing once sealed.
    pub fn truncate(&mut self, len: usize) {
        if self.sealed || len >= self.tcbs.len() {
            return;
        }
        self.tcbs.truncate(len);
        if self.idle.is_some_and(|idle| idle.index() >= len) {
            self.idle = None;
        }

        let idle = self.idle;
        let members: Vec<ThreadId, N> = self
            .tcbs
            .iter()
            .map(Tcb::id)
            .filter(|&id| Some(id) != idle)
            .collect();
        for (pos, &id) in members.iter().enumerate() {
            let next = members.get(pos + 1).or(members.first()).copied();
            self.tcbs[id.index()].set_next(next.unwrap_or(id));
        }
        self.head = members.first().copied();
        self.tail = members.last().copied();
        self.ring_len = members.len();
    }

    /// Close registration and make the first ring member current.
    pub fn seal(&mut self) -> RResult<ThreadId> {
        if self.sealed {
            return Err(KernelError::AlreadyLaunched);
        }
        let first = self.head.ok_or(KernelError::NoThreads)?;
        self.sealed = true;
        self.set_current(first);
        Ok(first)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Total registered threads, idle included
    pub fn len(&self) -> usize {
        self.tcbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tcbs.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of threads in the round-robin ring
    pub fn ring_len(&self) -> usize {
        self.ring_len
    }

    pub fn idle(&self) -> Option<ThreadId> {
        self.idle
    }

    pub fn is_idle(&self, id: ThreadId) -> bool {
        self.idle == Some(id)
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Ring member the next round-robin walk starts after
    pub fn anchor(&self) -> Option<ThreadId> {
        self.anchor
    }

    pub fn set_current(&mut self, id: ThreadId) {
        self.current = Some(id);
        if !self.is_idle(id) {
            self.anchor = Some(id);
        }
    }

    pub fn get(&self, id: ThreadId) -> Option<&Tcb<C>> {
        self.tcbs.get(id.index())
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb<C>> {
        self.tcbs.get_mut(id.index())
    }

    /// Like [`get_mut`](Self::get_mut), reporting a missing thread as an error
    pub fn tcb_mut(&mut self, id: ThreadId) -> RResult<&mut Tcb<C>> {
        self.get_mut(id).ok_or(KernelError::UnknownThread(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tcb<C>> + '_ {
        self.tcbs.iter()
    }

    /// Count every sleeping thread down by `elapsed` ticks.
    ///
    /// Returns how many threads woke up.
    pub fn elapse_sleep(&mut self, elapsed: u32) -> usize {
        if elapsed == 0 {
            return 0;
        }
        self.tcbs
            .iter_mut()
            .map(|tcb| tcb.elapse(elapsed))
            .filter(|&woke| woke)
            .count()
    }

    /// Status of every registered thread, in id order
    pub fn snapshot(&self) -> Vec<ThreadStatus, N> {
        self.tcbs
            .iter()
            .map(|tcb| tcb.status(self.is_idle(tcb.id())))
            .collect()
    }
}

impl<C: Copy, const N: usize> Default for ThreadRegistry<C, N> {
    fn default() -> Self {
        Self::new()
    }
}
