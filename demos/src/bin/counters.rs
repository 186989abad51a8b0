//! Three threads each bumping their own counter.
//!
//! With `--cooperative` every thread hands the processor on after each
//! increment, so the counts stay in lock step. Otherwise only the timer
//! rotates them and each runs for a whole time slice.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use clap::Parser;
use rtos_demos::{summarize, SimArgs};
use rtos_kernel::{Kernel, KernelConfig};
use rtos_posix::{halt, preemption_point, HostPort};

static KERNEL: Kernel<HostPort, 3> =
    Kernel::new(HostPort::new(), KernelConfig::new().with_name("counters"));

static COUNTS: [AtomicU64; 3] = [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)];
static COOPERATIVE: AtomicBool = AtomicBool::new(false);
static ROUNDS: AtomicU64 = AtomicU64::new(1000);

#[derive(Parser, Debug)]
#[command(author, version, about = "Round-robin counting threads")]
struct Opts {
    /// Suspend after every increment instead of waiting for preemption
    #[arg(long)]
    cooperative: bool,

    /// Stop once the first counter reaches this value
    #[arg(long, default_value_t = 1000)]
    rounds: u64,

    #[command(flatten)]
    sim: SimArgs,
}

fn count(slot: usize) {
    let value = COUNTS[slot].fetch_add(1, Ordering::Relaxed) + 1;
    if slot == 0 && value >= ROUNDS.load(Ordering::Relaxed) {
        halt();
    }
    if COOPERATIVE.load(Ordering::Relaxed) {
        KERNEL.suspend();
    } else {
        preemption_point();
    }
}

fn task0() -> ! {
    loop {
        count(0);
    }
}

fn task1() -> ! {
    loop {
        count(1);
    }
}

fn task2() -> ! {
    loop {
        count(2);
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    COOPERATIVE.store(opts.cooperative, Ordering::Relaxed);
    ROUNDS.store(opts.rounds.max(1), Ordering::Relaxed);

    KERNEL.add_threads(&[task0, task1, task2])?;
    let report = rtos_posix::run(&KERNEL, opts.sim.quantum()?)?;

    for (slot, count) in COUNTS.iter().enumerate() {
        println!("count{}: {}", slot, count.load(Ordering::Relaxed));
    }
    summarize(&report)
}
