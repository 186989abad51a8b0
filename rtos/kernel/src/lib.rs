#![no_std]
#![deny(unsafe_code)]

//! # rtos kernel
//!
//! A fixed population of threads scheduled round-robin by a periodic tick,
//! with counting and binary semaphores, tick-based sleep and bounded
//! mailboxes.
//!
//! A [`Kernel`] is one static value that owns every thread control block.
//! It is generic over a [`Port`], which supplies the context switch and the
//! tick source for a particular target.
//!
//! ```ignore
//! static KERNEL: Kernel<CortexMPort<3, 256>, 3> =
//!     Kernel::new(CortexMPort::new(), KernelConfig::new());
//! static SWITCHES: Mailbox<u32, 1> = Mailbox::new(PutPolicy::Lossy);
//!
//! fn main() -> ! {
//!     KERNEL.add_threads(&[producer, consumer, blinker]).unwrap();
//!     KERNEL.init_mailbox(&SWITCHES);
//!     KERNEL.launch(Quantum::from_rate(16_000_000, 500).unwrap())
//! }
//! ```

pub mod config;
pub mod kernel;
pub mod mailbox;
pub mod port;
pub mod sync;

pub use config::KernelConfig;
pub use kernel::Kernel;
pub use mailbox::Mailbox;
pub use port::{ContextSwitch, Port};
pub use sync::{BinarySemaphore, Semaphore};

pub use rtos_core::{
    fault, enter_critical, exit_critical, CriticalSection, KernelError, PutPolicy, Quantum,
    RResult, SleepAccounting, ThreadEntry, ThreadId, ThreadStatus, Tick, MAX_THREADS,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
