//! Semaphore state
//!
//! The counting semaphore keeps a signed value and a FIFO of blocked
//! threads. A negative value is the number of blocked threads, and every
//! queued thread's `blocked_on` refers back to the semaphore. The binary
//! semaphore has no queue: waiters poll and yield.

use core::num::NonZeroU16;

use heapless::Deque;

use crate::registry::ThreadRegistry;
use crate::thread::ThreadId;
use crate::{KernelError, RResult, MAX_THREADS};

/// Identity of an initialized counting semaphore, recorded in the TCBs of
/// its waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SemaphoreId(NonZeroU16);

impl SemaphoreId {
    /// Returns `None` for zero, which is reserved for "uninitialized".
    pub const fn new(raw: u16) -> Option<Self> {
        match NonZeroU16::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub const fn raw(self) -> u16 {
        self.0.get()
    }
}

impl From<NonZeroU16> for SemaphoreId {
    fn from(raw: NonZeroU16) -> Self {
        Self(raw)
    }
}

/// Result of a wait on a counting semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitOutcome {
    /// A unit was available and has been taken
    Acquired,
    /// The thread was queued and marked blocked; it must give up the CPU
    Blocked,
}

/// Counting semaphore state
#[derive(Debug)]
pub struct SemaphoreState {
    id: Option<SemaphoreId>,
    value: i32,
    waiters: Deque<ThreadId, MAX_THREADS>,
}

impl SemaphoreState {
    /// State of a semaphore that has not been initialized yet
    pub const fn uninit() -> Self {
        Self {
            id: None,
            value: 0,
            waiters: Deque::new(),
        }
    }

    /// Set the initial value.
    ///
    /// Re-initializing keeps the semaphore's identity. A semaphore with
    /// blocked waiters is left untouched and reported as in use.
    pub fn init(&mut self, id: SemaphoreId, value: i32) -> RResult<()> {
        if !self.waiters.is_empty() {
            return Err(KernelError::SemaphoreInUse);
        }
        self.id = Some(self.id.unwrap_or(id));
        self.value = value;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.id.is_some()
    }

    pub fn id(&self) -> RResult<SemaphoreId> {
        self.id.ok_or(KernelError::UninitializedSemaphore)
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// Number of blocked threads, always `max(0, -value)`
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Take one unit for `thread`, or queue it if none is available.
    pub fn wait<C: Copy, const N: usize>(
        &mut self,
        registry: &mut ThreadRegistry<C, N>,
        thread: ThreadId,
    ) -> RResult<WaitOutcome> {
        let id = self.id()?;
        let tcb = registry.tcb_mut(thread)?;

        if self.value > 0 {
            self.value -= 1;
            return Ok(WaitOutcome::Acquired);
        }

        self.waiters
            .push_back(thread)
            .map_err(|_| KernelError::WaiterOverflow)?;
        self.value -= 1;
        tcb.block_on(id);
        Ok(WaitOutcome::Blocked)
    }

    /// Take one unit if available, never blocking.
    pub fn try_wait(&mut self) -> RResult<bool> {
        self.id()?;
        if self.value > 0 {
            self.value -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release one unit, unblocking the oldest waiter if there is one.
    ///
    /// The woken thread becomes runnable but does not run until the
    /// scheduler next picks it.
    pub fn signal<C: Copy, const N: usize>(
        &mut self,
        registry: &mut ThreadRegistry<C, N>,
    ) -> RResult<Option<ThreadId>> {
        self.id()?;
        self.value += 1;
        if self.value > 0 {
            return Ok(None);
        }

        let woken = self.waiters.pop_front();
        if let Some(thread) = woken {
            registry.tcb_mut(thread)?.unblock();
        }
        Ok(woken)
    }
}

impl Default for SemaphoreState {
    fn default() -> Self {
        Self::uninit()
    }
}

/// Binary semaphore state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryState {
    available: bool,
}

impl BinaryState {
    pub const fn new(available: bool) -> Self {
        Self { available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Take the semaphore if it is free.
    pub fn try_take(&mut self) -> bool {
        core::mem::replace(&mut self.available, false)
    }

    pub fn give(&mut self) {
        self.available = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threads(n: usize) -> ThreadRegistry<(), 8> {
        let mut reg = ThreadRegistry::new();
        for _ in 0..n {
            reg.register(|_| Ok(())).unwrap();
        }
        reg
    }

    fn sema(value: i32) -> SemaphoreState {
        let mut s = SemaphoreState::uninit();
        s.init(SemaphoreId::new(1).unwrap(), value).unwrap();
        s
    }

    #[test]
    fn uninitialized_use_is_reported() {
        let mut reg = threads(1);
        let mut s = SemaphoreState::uninit();
        assert_eq!(
            s.wait(&mut reg, ThreadId::new(0)),
            Err(KernelError::UninitializedSemaphore)
        );
        assert_eq!(s.signal(&mut reg), Err(KernelError::UninitializedSemaphore));
        assert_eq!(s.try_wait(), Err(KernelError::UninitializedSemaphore));
    }

    #[test]
    fn wait_consumes_available_units() {
        let mut reg = threads(1);
        let mut s = sema(2);
        let t0 = ThreadId::new(0);

        assert_eq!(s.wait(&mut reg, t0), Ok(WaitOutcome::Acquired));
        assert_eq!(s.wait(&mut reg, t0), Ok(WaitOutcome::Acquired));
        assert_eq!(s.value(), 0);
        assert!(reg.get(t0).unwrap().is_runnable());
    }

    #[test]
    fn waiters_wake_in_fifo_order() {
        let mut reg = threads(3);
        let mut s = sema(0);
        let id = s.id().unwrap();

        for n in 0..3 {
            assert_eq!(
                s.wait(&mut reg, ThreadId::new(n)),
                Ok(WaitOutcome::Blocked)
            );
            assert_eq!(
                reg.get(ThreadId::new(n)).unwrap().blocked_on(),
                Some(id)
            );
        }
        assert_eq!(s.value(), -3);
        assert_eq!(s.waiter_count(), 3);

        for n in 0..3 {
            assert_eq!(s.signal(&mut reg), Ok(Some(ThreadId::new(n))));
            assert!(reg.get(ThreadId::new(n)).unwrap().is_runnable());
        }
        assert_eq!(s.signal(&mut reg), Ok(None));
        assert_eq!(s.value(), 1);
    }

    #[test]
    fn try_wait_never_blocks() {
        let mut s = sema(1);
        assert_eq!(s.try_wait(), Ok(true));
        assert_eq!(s.try_wait(), Ok(false));
        assert_eq!(s.value(), 0);
    }

    #[test]
    fn reinit_keeps_identity() {
        let mut s = sema(0);
        s.init(SemaphoreId::new(9).unwrap(), 4).unwrap();
        assert_eq!(s.id().unwrap().raw(), 1);
        assert_eq!(s.value(), 4);
    }

    #[test]
    fn reinit_with_waiters_is_refused() {
        let mut reg = threads(2);
        let mut s = sema(0);
        let id = s.id().unwrap();
        assert_eq!(s.wait(&mut reg, ThreadId::new(1)), Ok(WaitOutcome::Blocked));

        assert_eq!(
            s.init(SemaphoreId::new(5).unwrap(), 3),
            Err(KernelError::SemaphoreInUse)
        );
        assert_eq!(s.value(), -1);
        assert_eq!(s.waiter_count(), 1);
        assert_eq!(reg.get(ThreadId::new(1)).unwrap().blocked_on(), Some(id));

        // the queued thread can still be woken
        assert_eq!(s.signal(&mut reg), Ok(Some(ThreadId::new(1))));
        assert!(reg.get(ThreadId::new(1)).unwrap().is_runnable());
        assert_eq!(s.init(SemaphoreId::new(5).unwrap(), 3), Ok(()));
        assert_eq!(s.value(), 3);
    }

    #[test]
    fn binary_take_and_give() {
        let mut b = BinaryState::new(true);
        assert!(b.try_take());
        assert!(!b.try_take());
        b.give();
        b.give();
        assert!(b.try_take());
        assert!(!b.is_available());
    }
}
