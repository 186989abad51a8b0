//! Colour picker on a simulated board.
//!
//! A switch monitor samples three colour switches, a button handler queues
//! the selected colour each time the button is pressed, and a display thread
//! shows queued colours one after another. An LCD thread prints the status
//! line, sharing the screen with the display through a counting semaphore.
//! The switches and button follow a fixed script of presses.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use clap::Parser;
use rtos_demos::{summarize, SimArgs};
use rtos_kernel::{Kernel, KernelConfig, Mailbox, PutPolicy, Semaphore};
use rtos_posix::{halt, preemption_point, HostPort};

/// One tick per millisecond, so sleeps read in milliseconds
const TICK_HZ: u32 = 1000;
const QUEUE_DEPTH: usize = 10;

const BLACK: u8 = 0;

static KERNEL: Kernel<HostPort, 5> = Kernel::new(
    HostPort::new(),
    KernelConfig::new()
        .with_name("color-show")
        .with_tick_hz(TICK_HZ),
);
static COLORS: Mailbox<u8, QUEUE_DEPTH> = Mailbox::new(PutPolicy::Blocking);
static LCD: Semaphore = Semaphore::new();
static COLOR_UPDATE: Semaphore = Semaphore::new();

static SWITCHES: AtomicU8 = AtomicU8::new(BLACK);
static SHOWING: AtomicU8 = AtomicU8::new(BLACK);
static SHOWN: AtomicU32 = AtomicU32::new(0);
static TARGET: AtomicU32 = AtomicU32::new(4);
static HOLD_MS: AtomicU32 = AtomicU32::new(1500);

/// (time in ms, switch setting); the button is held from 30 ms to 60 ms
/// after each setting
const SCRIPT: [(u64, u8); 6] = [(100, 1), (300, 6), (500, 4), (700, 7), (900, 3), (1100, 5)];
const PRESS_FROM: u64 = 30;
const PRESS_UNTIL: u64 = 60;

#[derive(Parser, Debug)]
#[command(author, version, about = "Queue colours with a button, show them in turn")]
struct Opts {
    /// Stop after showing this many colours
    #[arg(long, default_value_t = 4)]
    colors: u32,

    /// Milliseconds each colour stays on
    #[arg(long, default_value_t = 1500)]
    hold_ms: u32,

    #[command(flatten)]
    sim: SimArgs,
}

fn color_name(color: u8) -> &'static str {
    match color & 0x07 {
        0 => "Blk",
        1 => "Red",
        2 => "Blu",
        3 => "Mag",
        4 => "Grn",
        5 => "Yel",
        6 => "Cyn",
        _ => "Wht",
    }
}

fn scripted_switches(now_ms: u64) -> u8 {
    SCRIPT
        .iter()
        .take_while(|(at, _)| *at <= now_ms)
        .last()
        .map_or(BLACK, |(_, color)| *color)
}

fn button_down(now_ms: u64) -> bool {
    SCRIPT
        .iter()
        .any(|(at, _)| now_ms >= at + PRESS_FROM && now_ms < at + PRESS_UNTIL)
}

/// Print a line while holding the screen
fn lcd_line(row: u8, text: &str) {
    KERNEL.wait(&LCD);
    println!("[{:>5} ms] lcd{}: {}", KERNEL.uptime_millis(), row, text);
    KERNEL.signal(&LCD);
}

fn switch_monitor() -> ! {
    let mut last = BLACK;
    loop {
        let switches = scripted_switches(KERNEL.uptime_millis());
        SWITCHES.store(switches, Ordering::Relaxed);
        if switches != last {
            lcd_line(1, &format!("switches -> {}", color_name(switches)));
            last = switches;
        }
        KERNEL.sleep(50);
    }
}

fn button_handler() -> ! {
    let mut was_down = false;
    loop {
        let down = button_down(KERNEL.uptime_millis());
        if down && !was_down {
            // debounce
            KERNEL.sleep(10);
            if button_down(KERNEL.uptime_millis()) && !COLORS.is_full() {
                let color = SWITCHES.load(Ordering::Relaxed);
                if let Err(err) = COLORS.put(&KERNEL, color) {
                    lcd_line(1, &format!("queue error: {err}"));
                }
                lcd_line(1, &format!("queued {}", color_name(color)));
                // nothing on show yet, so start right away
                if COLORS.len() == 1 && SHOWING.load(Ordering::Relaxed) == BLACK {
                    KERNEL.signal(&COLOR_UPDATE);
                }
            }
        }
        was_down = down;
        KERNEL.sleep(20);
    }
}

fn display() -> ! {
    loop {
        if COLORS.is_empty() {
            SHOWING.store(BLACK, Ordering::Relaxed);
            lcd_line(0, "input a color");
        } else {
            let color = COLORS.get(&KERNEL);
            SHOWING.store(color, Ordering::Relaxed);
            let shown = SHOWN.fetch_add(1, Ordering::Relaxed) + 1;
            lcd_line(
                0,
                &format!("showing {} ({} queued)", color_name(color), COLORS.len()),
            );
            if shown >= TARGET.load(Ordering::Relaxed) {
                halt();
            }
        }
        for _ in 0..HOLD_MS.load(Ordering::Relaxed) / 100 {
            KERNEL.sleep(100);
            if KERNEL.try_wait(&COLOR_UPDATE) {
                break;
            }
        }
    }
}

fn lcd_updater() -> ! {
    loop {
        let next = COLORS.peek_next().map_or("-", color_name);
        lcd_line(
            2,
            &format!(
                "on {} next {} queued {}",
                color_name(SHOWING.load(Ordering::Relaxed)),
                next,
                COLORS.len()
            ),
        );
        KERNEL.sleep(1000);
    }
}

fn idle() -> ! {
    loop {
        preemption_point();
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    TARGET.store(opts.colors.max(1), Ordering::Relaxed);
    HOLD_MS.store(opts.hold_ms.max(100), Ordering::Relaxed);

    KERNEL.add_threads(&[switch_monitor, button_handler, display, lcd_updater])?;
    KERNEL.set_idle(idle)?;
    KERNEL.init_semaphore(&LCD, 1);
    KERNEL.init_semaphore(&COLOR_UPDATE, 0);
    KERNEL.init_mailbox(&COLORS);

    let report = rtos_posix::run(&KERNEL, opts.sim.quantum()?)?;
    println!("showed {} colours", SHOWN.load(Ordering::Relaxed));
    summarize(&report)
}
