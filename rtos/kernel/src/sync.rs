//! Semaphore handles
//!
//! Declared as `static` items by the application and initialized through
//! the kernel. Waiting and signalling go through [`Kernel`](crate::Kernel)
//! because blocking has to update the waiter's thread control block.

use core::cell::RefCell;

use critical_section::Mutex;
use rtos_core::{BinaryState, SemaphoreState};

/// Counting semaphore with a FIFO of blocked threads
pub struct Semaphore {
    pub(crate) state: Mutex<RefCell<SemaphoreState>>,
}

impl Semaphore {
    /// An uninitialized semaphore. Waiting on it before
    /// [`Kernel::init_semaphore`](crate::Kernel::init_semaphore) is a kernel
    /// fault.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SemaphoreState::uninit())),
        }
    }

    /// Current value; negative values count blocked threads.
    pub fn value(&self) -> i32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).value())
    }

    pub fn waiter_count(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).waiter_count())
    }

    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).is_initialized())
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary semaphore. Waiters poll and yield, so there is no ordering among
/// them.
pub struct BinarySemaphore {
    pub(crate) state: Mutex<RefCell<BinaryState>>,
}

impl BinarySemaphore {
    pub const fn new(available: bool) -> Self {
        Self {
            state: Mutex::new(RefCell::new(BinaryState::new(available))),
        }
    }

    pub fn is_available(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).is_available())
    }

    pub(crate) fn try_take(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).try_take())
    }

    pub(crate) fn give(&self) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).give())
    }
}
