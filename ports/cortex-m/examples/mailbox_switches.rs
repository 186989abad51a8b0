//! Three threads on a 16 MHz Cortex-M4, switching at 500 Hz.
//!
//! `sampler` periodically reads the switch inputs and mails them,
//! `display` mirrors every mailed value onto the LED outputs and `counter`
//! just burns its time slice. The GPIO registers are modelled by atomics so
//! the example has no board dependency.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;
use rtos_kernel::{Kernel, KernelConfig, Mailbox, PutPolicy, Quantum};
use rtos_port_cortex_m::CortexMPort;

const CORE_HZ: u32 = 16_000_000;
const TICK_HZ: u32 = 500;

static KERNEL: Kernel<CortexMPort<3, 256>, 3> = Kernel::new(
    CortexMPort::new(),
    KernelConfig::new().with_name("switches").with_tick_hz(TICK_HZ),
);
static SWITCHES: Mailbox<u32, 1> = Mailbox::new(PutPolicy::Lossy);

static SWITCH_INPUT: AtomicU32 = AtomicU32::new(0b0110);
static LED_OUTPUT: AtomicU32 = AtomicU32::new(0);

fn sampler() -> ! {
    let mut count = 0u32;
    loop {
        count += 1;
        LED_OUTPUT.fetch_and(!0x0E, Ordering::Relaxed);
        if count == 750 {
            let switches = SWITCH_INPUT.load(Ordering::Relaxed) & 0x0E;
            // dropped and counted if the display has not read the last one
            let _ = SWITCHES.put(&KERNEL, switches);
            count = 0;
        }
    }
}

fn display() -> ! {
    loop {
        let switches = SWITCHES.get(&KERNEL);
        LED_OUTPUT.store(switches, Ordering::Relaxed);
    }
}

fn counter() -> ! {
    let mut count = 0u32;
    loop {
        count = (count + 1) % 0xFFFF;
        core::hint::black_box(count);
    }
}

#[entry]
fn main() -> ! {
    if KERNEL.add_threads(&[sampler, display, counter]).is_err() {
        loop {
            cortex_m::asm::bkpt();
        }
    }
    KERNEL.init_mailbox(&SWITCHES);

    match Quantum::from_rate(CORE_HZ, TICK_HZ) {
        Ok(quantum) => KERNEL.launch(quantum),
        Err(_) => loop {
            cortex_m::asm::bkpt();
        },
    }
}
