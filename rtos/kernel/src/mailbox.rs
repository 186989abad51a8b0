//! Bounded mailbox
//!
//! A FIFO of `N` values shared between threads. Consumers block on a `data`
//! semaphore counting stored values. Under [`PutPolicy::Blocking`] producers
//! block on a `room` semaphore counting free slots; under
//! [`PutPolicy::Lossy`] a put into a full mailbox drops the new value and
//! counts it as lost.

use core::cell::RefCell;

use critical_section::Mutex;
use log::warn;
use rtos_core::{fault, KernelError, PutPolicy, RResult, Ring};

use crate::kernel::Kernel;
use crate::port::Port;
use crate::sync::Semaphore;

pub struct Mailbox<T, const N: usize> {
    policy: PutPolicy,
    ring: Mutex<RefCell<Ring<T, N>>>,
    data: Semaphore,
    room: Semaphore,
}

impl<T: Copy + Send, const N: usize> Mailbox<T, N> {
    pub const fn new(policy: PutPolicy) -> Self {
        assert!(N >= 1 && N <= i32::MAX as usize, "mailbox capacity out of range");
        Self {
            policy,
            ring: Mutex::new(RefCell::new(Ring::new())),
            data: Semaphore::new(),
            room: Semaphore::new(),
        }
    }

    pub(crate) fn reset<P: Port, const K: usize>(&self, kernel: &Kernel<P, K>) {
        critical_section::with(|cs| self.ring.borrow_ref_mut(cs).clear());
        kernel.init_semaphore(&self.data, 0);
        if self.policy == PutPolicy::Blocking {
            kernel.init_semaphore(&self.room, N as i32);
        }
    }

    pub fn policy(&self) -> PutPolicy {
        self.policy
    }

    /// Store `value`.
    ///
    /// A blocking mailbox waits for room and always succeeds. A lossy
    /// mailbox returns [`KernelError::MailboxFull`] when full and keeps the
    /// values it already holds.
    pub fn put<P: Port, const K: usize>(&self, kernel: &Kernel<P, K>, value: T) -> RResult<()> {
        match self.policy {
            PutPolicy::Lossy => {
                let pushed = critical_section::with(|cs| {
                    self.ring.borrow_ref_mut(cs).push_or_count_loss(value)
                });
                if let Err(err) = pushed {
                    warn!("mailbox full, value dropped ({} lost)", self.lost());
                    return Err(err);
                }
            }
            PutPolicy::Blocking => {
                kernel.wait(&self.room);
                let pushed =
                    critical_section::with(|cs| self.ring.borrow_ref_mut(cs).push(value));
                // a unit of room always has a free slot behind it
                if pushed.is_err() {
                    fault(KernelError::MailboxFull);
                }
            }
        }
        kernel.signal(&self.data);
        Ok(())
    }

    /// Remove the oldest value, blocking until there is one.
    pub fn get<P: Port, const K: usize>(&self, kernel: &Kernel<P, K>) -> T {
        kernel.wait(&self.data);
        let value = critical_section::with(|cs| self.ring.borrow_ref_mut(cs).pop());
        let Some(value) = value else {
            fault(KernelError::MailboxEmpty)
        };
        if self.policy == PutPolicy::Blocking {
            kernel.signal(&self.room);
        }
        value
    }

    /// The value `get` would return next, if any. Never blocks.
    pub fn peek_next(&self) -> Option<T> {
        critical_section::with(|cs| self.ring.borrow_ref(cs).peek())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.ring.borrow_ref(cs).is_full())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Values dropped by lossy puts into a full mailbox
    pub fn lost(&self) -> u32 {
        critical_section::with(|cs| self.ring.borrow_ref(cs).lost())
    }
}
