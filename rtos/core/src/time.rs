//! Time management types
//!
//! All kernel time is measured in scheduler ticks, one tick per expiry of the
//! periodic timer. The timer period itself is a [`Quantum`] of hardware
//! timer cycles supplied at launch.

use core::fmt;

use crate::{KernelError, RResult};

/// Per-thread sleep countdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticks(u32);

impl Ticks {
    /// Not sleeping
    pub const ZERO: Self = Self(0);

    /// Create a new countdown
    pub const fn new(ticks: u32) -> Self {
        Self(ticks)
    }

    /// Get the remaining tick count
    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// Check if the countdown has expired
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Count down by `elapsed` ticks, saturating at zero.
    ///
    /// Returns true if this call brought the countdown to zero.
    pub fn elapse(&mut self, elapsed: u32) -> bool {
        if self.0 == 0 || elapsed == 0 {
            return false;
        }
        self.0 = self.0.saturating_sub(elapsed);
        self.0 == 0
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ticks", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Ticks {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}ticks", self.0);
    }
}

/// System tick counter, advanced once per timer interrupt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(u64);

impl Tick {
    /// Zero tick
    pub const ZERO: Self = Self(0);

    /// Create a new tick count
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Get the raw tick value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Increment the tick counter
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Calculate elapsed ticks since a previous tick
    pub fn elapsed_since(self, previous: Tick) -> u64 {
        self.0.wrapping_sub(previous.0)
    }

    /// Convert to milliseconds for a timer running at `tick_hz`
    pub fn as_millis(self, tick_hz: u32) -> u64 {
        if tick_hz == 0 {
            return 0;
        }
        self.0.saturating_mul(1000) / u64::from(tick_hz)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Tick {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.0);
    }
}

/// Preemption quantum in hardware timer cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantum(u32);

impl Quantum {
    /// Create a quantum of `cycles` timer cycles
    pub const fn new(cycles: u32) -> RResult<Self> {
        if cycles == 0 {
            Err(KernelError::ZeroQuantum)
        } else {
            Ok(Self(cycles))
        }
    }

    /// Quantum that yields `tick_hz` ticks per second from a `clock_hz` timer
    pub const fn from_rate(clock_hz: u32, tick_hz: u32) -> RResult<Self> {
        if tick_hz == 0 {
            return Err(KernelError::ZeroQuantum);
        }
        Self::new(clock_hz / tick_hz)
    }

    /// Timer cycles per tick
    pub const fn cycles(self) -> u32 {
        self.0
    }

    /// Value for a down-counting timer that reloads after reaching zero
    pub const fn reload_value(self) -> u32 {
        self.0 - 1
    }
}

impl fmt::Display for Quantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}cycles", self.0)
    }
}
