//! Kernel configuration

use rtos_core::SleepAccounting;

/// Configuration for a kernel instance.
///
/// Const-constructible so that it can initialize a `static` kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub name: &'static str,
    pub sleep_accounting: SleepAccounting,
    /// Tick rate the port is launched with; only used to convert tick
    /// counts to wall time.
    pub tick_hz: u32,
}

impl KernelConfig {
    pub const DEFAULT_TICK_HZ: u32 = 500;

    pub const fn new() -> Self {
        Self {
            name: "rtos",
            sleep_accounting: SleepAccounting::TicksOnly,
            tick_hz: Self::DEFAULT_TICK_HZ,
        }
    }

    /// Sets the kernel name used in log output.
    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Sets how sleep countdowns advance.
    pub const fn with_sleep_accounting(self, sleep_accounting: SleepAccounting) -> Self {
        Self {
            sleep_accounting,
            ..self
        }
    }

    /// Sets the tick rate.
    pub const fn with_tick_hz(self, tick_hz: u32) -> Self {
        Self { tick_hz, ..self }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
