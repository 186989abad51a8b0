//! Round-robin scheduler
//!
//! Selection is a walk of the registry's ring starting after the last ring
//! member that ran. Ties are broken by ring position alone, so every
//! runnable thread is chosen within one traversal.

use crate::registry::ThreadRegistry;
use crate::thread::ThreadId;
use crate::{KernelError, RResult};

/// How sleep countdowns advance at each scheduling decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepAccounting {
    /// Count down only by timer ticks that elapsed since the last decision.
    /// Yields and blocking calls do not shorten a sleep.
    #[default]
    TicksOnly,
    /// Count down by at least one at every decision, tick or not. A sleep
    /// then lasts at most the requested number of ticks.
    EveryDecision,
}

/// Scheduler policy state
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    accounting: SleepAccounting,
}

impl Scheduler {
    pub const fn new(accounting: SleepAccounting) -> Self {
        Self { accounting }
    }

    pub fn accounting(&self) -> SleepAccounting {
        self.accounting
    }

    /// Make one scheduling decision.
    ///
    /// Applies `elapsed_ticks` of sleep bookkeeping, picks the next thread
    /// and makes it current.
    pub fn schedule<C: Copy, const N: usize>(
        &self,
        registry: &mut ThreadRegistry<C, N>,
        elapsed_ticks: u32,
    ) -> RResult<ThreadId> {
        let elapsed = match self.accounting {
            SleepAccounting::TicksOnly => elapsed_ticks,
            SleepAccounting::EveryDecision => elapsed_ticks.max(1),
        };
        registry.elapse_sleep(elapsed);

        let next = self.select_next(registry)?;
        registry.set_current(next);
        Ok(next)
    }

    /// Pick the next runnable thread without changing any state.
    ///
    /// Falls back to the idle thread when no ring member is runnable.
    pub fn select_next<C: Copy, const N: usize>(
        &self,
        registry: &ThreadRegistry<C, N>,
    ) -> RResult<ThreadId> {
        let anchor = registry.anchor().ok_or(KernelError::NoThreads)?;
        let mut candidate = registry
            .get(anchor)
            .ok_or(KernelError::UnknownThread(anchor))?
            .next();

        // The walk ends on the anchor itself, so a lone runnable current
        // thread keeps the CPU.
        for _ in 0..registry.ring_len() {
            let tcb = registry
                .get(candidate)
                .ok_or(KernelError::UnknownThread(candidate))?;
            if tcb.is_runnable() {
                return Ok(candidate);
            }
            candidate = tcb.next();
        }

        match registry.idle().and_then(|id| registry.get(id)) {
            Some(idle) if idle.is_runnable() => Ok(idle.id()),
            _ => Err(KernelError::NoRunnableThread),
        }
    }
}
