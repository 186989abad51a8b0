//! Critical section guard
//!
//! On target the `critical-section` implementation masks interrupts
//! (PRIMASK on Cortex-M); on a host build it is the crate's global reentrant
//! lock. Either way the guard saves the previous state on entry and restores
//! it on exit, so sections nest.
#![allow(unsafe_code)]

use core::marker::PhantomData;

/// RAII guard for a critical section
///
/// Masks preemption when created and restores the previous mask state when
/// dropped. Guards must be dropped in the reverse order of creation, which
/// ordinary scoping guarantees.
pub struct CriticalSection {
    restore: critical_section::RestoreState,
    // The restore token belongs to the execution context that took it.
    _not_send: PhantomData<*mut ()>,
}

impl CriticalSection {
    fn enter() -> Self {
        // SAFETY: the matching `release` runs in `Drop`, on the same
        // execution context because the guard is `!Send`.
        let restore = unsafe { critical_section::acquire() };
        Self {
            restore,
            _not_send: PhantomData,
        }
    }

    /// Token proving the section is held, for borrowing
    /// `critical_section::Mutex` contents.
    pub fn token(&self) -> critical_section::CriticalSection<'_> {
        // SAFETY: the token cannot outlive `self`, and interrupts stay masked
        // for as long as `self` is alive.
        unsafe { critical_section::CriticalSection::new() }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        // SAFETY: `restore` came from the `acquire` in `enter`, and guards
        // are released in LIFO order.
        unsafe { critical_section::release(self.restore) }
    }
}

/// Enter a critical section
///
/// Returns a guard that restores the previous interrupt state when dropped.
///
/// ```
/// let guard = rtos_core::enter_critical();
/// // shared kernel state may be touched here
/// rtos_core::exit_critical(guard);
/// ```
#[inline]
pub fn enter_critical() -> CriticalSection {
    CriticalSection::enter()
}

/// Exit a critical section, restoring the state saved by `enter_critical`.
#[inline]
pub fn exit_critical(guard: CriticalSection) {
    drop(guard);
}
