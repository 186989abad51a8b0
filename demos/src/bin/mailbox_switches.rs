//! Sampler, display and counter threads sharing a one-slot lossy mailbox.
//!
//! The sampler reads a simulated switch bank every `--period` loop
//! iterations and mails the reading. The display mirrors each mailed value
//! onto simulated LEDs. Readings the display has not collected in time are
//! dropped and counted.

use std::sync::atomic::{AtomicU32, Ordering};

use clap::Parser;
use rtos_demos::{summarize, SimArgs};
use rtos_kernel::{Kernel, KernelConfig, Mailbox, PutPolicy};
use rtos_posix::{halt, preemption_point, HostPort};

static KERNEL: Kernel<HostPort, 3> = Kernel::new(
    HostPort::new(),
    KernelConfig::new().with_name("mailbox-switches"),
);
static SWITCHES: Mailbox<u32, 1> = Mailbox::new(PutPolicy::Lossy);

static PERIOD: AtomicU32 = AtomicU32::new(750);
static MESSAGES: AtomicU32 = AtomicU32::new(8);
static SHOWN: AtomicU32 = AtomicU32::new(0);
static LEDS: AtomicU32 = AtomicU32::new(0);

#[derive(Parser, Debug)]
#[command(author, version, about = "Mail switch readings to a display thread")]
struct Opts {
    /// Sampler loop iterations between readings
    #[arg(long, default_value_t = 750)]
    period: u32,

    /// Stop after the display has shown this many readings
    #[arg(long, default_value_t = 8)]
    messages: u32,

    #[command(flatten)]
    sim: SimArgs,
}

/// Switch bank reading for the `n`th sample: bits 1-3 walk through a pattern
fn read_switches(n: u32) -> u32 {
    (n.wrapping_mul(0b0110) ^ n) & 0x0E
}

fn sampler() -> ! {
    let mut count = 0u32;
    let mut samples = 0u32;
    loop {
        count += 1;
        if count >= PERIOD.load(Ordering::Relaxed) {
            samples += 1;
            let _ = SWITCHES.put(&KERNEL, read_switches(samples));
            count = 0;
        }
        preemption_point();
    }
}

fn display() -> ! {
    loop {
        let switches = SWITCHES.get(&KERNEL);
        LEDS.store(switches, Ordering::Relaxed);
        let shown = SHOWN.fetch_add(1, Ordering::Relaxed) + 1;
        println!(
            "[{:>6}] leds {:04b} ({} lost so far)",
            KERNEL.now().raw(),
            switches,
            SWITCHES.lost()
        );
        if shown >= MESSAGES.load(Ordering::Relaxed) {
            halt();
        }
    }
}

fn counter() -> ! {
    let mut count = 0u32;
    loop {
        count = (count + 1) % 0xFFFF;
        std::hint::black_box(count);
        preemption_point();
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    PERIOD.store(opts.period.max(1), Ordering::Relaxed);
    MESSAGES.store(opts.messages.max(1), Ordering::Relaxed);

    KERNEL.add_threads(&[sampler, display, counter])?;
    KERNEL.init_mailbox(&SWITCHES);

    let report = rtos_posix::run(&KERNEL, opts.sim.quantum()?)?;
    println!(
        "display showed {} readings, {} dropped",
        SHOWN.load(Ordering::Relaxed),
        SWITCHES.lost()
    );
    summarize(&report)
}
