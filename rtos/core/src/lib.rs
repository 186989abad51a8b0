#![no_std]
#![deny(unsafe_code)]

//! # rtos core
//!
//! Portable building blocks of the round-robin kernel: the thread registry,
//! the scheduler's selection logic, semaphore and mailbox state, time types
//! and the critical section guard that serializes all of them.
//!
//! Nothing in this crate touches processor registers. The context switch and
//! the tick source live in a port crate; the glue that owns the state and
//! hands it to application threads lives in `rtos-kernel`.

use core::fmt;

pub mod critical;
pub mod fifo;
pub mod registry;
pub mod scheduler;
pub mod sema;
pub mod thread;
pub mod time;

pub use critical::{enter_critical, exit_critical, CriticalSection};
pub use fifo::{PutPolicy, Ring};
pub use registry::ThreadRegistry;
pub use scheduler::{Scheduler, SleepAccounting};
pub use sema::{BinaryState, SemaphoreId, SemaphoreState, WaitOutcome};
pub use thread::{Tcb, ThreadEntry, ThreadId, ThreadStatus};
pub use time::{Quantum, Tick, Ticks};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on the number of threads any kernel instance may register.
///
/// Semaphore waiter queues are sized by this constant so that a semaphore
/// does not need to know which kernel it belongs to.
pub const MAX_THREADS: usize = 8;

/// Result type used throughout the kernel
pub type RResult<T> = Result<T, KernelError>;

/// Errors reported by kernel operations.
///
/// Most of these are configuration errors: caller bugs that are detected
/// where the check is cheap. Operations without a `Result` channel (wait,
/// sleep, the context switch) turn them into a kernel panic instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// More threads were supplied than the registry can hold
    #[error("thread registry is full (capacity {capacity})")]
    RegistryFull { capacity: usize },
    /// No thread with this id is registered
    #[error("{0} is not registered")]
    UnknownThread(ThreadId),
    /// The port has no stack slot for this thread
    #[error("port has no stack for {0}")]
    NoStack(ThreadId),
    /// Threads may only be registered before launch, and launch happens once
    #[error("scheduler already launched")]
    AlreadyLaunched,
    /// A thread operation was called before the scheduler started
    #[error("scheduler not launched")]
    NotLaunched,
    /// Launch requires at least one round-robin thread
    #[error("no threads registered")]
    NoThreads,
    /// An idle thread has already been designated
    #[error("idle thread already registered")]
    IdleAlreadySet,
    /// The time quantum must be at least one timer cycle
    #[error("time quantum must be non-zero")]
    ZeroQuantum,
    /// A semaphore was used before `init`
    #[error("semaphore used before initialization")]
    UninitializedSemaphore,
    /// A semaphore was re-initialized while threads were blocked on it
    #[error("semaphore re-initialized with blocked waiters")]
    SemaphoreInUse,
    /// A semaphore's waiter queue overflowed
    #[error("semaphore waiter queue overflow")]
    WaiterOverflow,
    /// Every thread is blocked or sleeping and there is no idle thread
    #[error("no runnable thread")]
    NoRunnableThread,
    /// A non-blocking put found the mailbox full
    #[error("mailbox is full")]
    MailboxFull,
    /// A mailbox had no value although its data semaphore was taken
    #[error("mailbox empty after data was signalled")]
    MailboxEmpty,
    /// A thread entry point returned
    #[error("thread entry point returned")]
    ThreadReturned,
}

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            KernelError::RegistryFull { capacity } => {
                defmt::write!(fmt, "RegistryFull({})", capacity)
            }
            KernelError::UnknownThread(id) => defmt::write!(fmt, "UnknownThread({})", id),
            KernelError::NoStack(id) => defmt::write!(fmt, "NoStack({})", id),
            KernelError::AlreadyLaunched => defmt::write!(fmt, "AlreadyLaunched"),
            KernelError::NotLaunched => defmt::write!(fmt, "NotLaunched"),
            KernelError::NoThreads => defmt::write!(fmt, "NoThreads"),
            KernelError::IdleAlreadySet => defmt::write!(fmt, "IdleAlreadySet"),
            KernelError::ZeroQuantum => defmt::write!(fmt, "ZeroQuantum"),
            KernelError::UninitializedSemaphore => defmt::write!(fmt, "UninitializedSemaphore"),
            KernelError::SemaphoreInUse => defmt::write!(fmt, "SemaphoreInUse"),
            KernelError::WaiterOverflow => defmt::write!(fmt, "WaiterOverflow"),
            KernelError::NoRunnableThread => defmt::write!(fmt, "NoRunnableThread"),
            KernelError::MailboxFull => defmt::write!(fmt, "MailboxFull"),
            KernelError::MailboxEmpty => defmt::write!(fmt, "MailboxEmpty"),
            KernelError::ThreadReturned => defmt::write!(fmt, "ThreadReturned"),
        }
    }
}

/// Kernel fault: an unrecoverable configuration error raised where no
/// `Result` channel exists.
#[cold]
#[track_caller]
pub fn fault(error: KernelError) -> ! {
    panic!("kernel fault: {}", error)
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.raw())
    }
}
