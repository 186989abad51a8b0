#![no_std]

//! ARMv7-M port
//!
//! SysTick provides the tick and PendSV performs the context switch. Both run
//! at the lowest exception priority, so a switch never interrupts another
//! handler and SysTick cannot land in the middle of one.
//!
//! Each thread's saved context is its process stack pointer. Below it the
//! thread's stack holds R4-R11 (pushed by PendSV) and then the exception
//! frame the hardware pushed on entry: R0-R3, R12, LR, PC and xPSR.
//! Floating-point state is not saved, so threads must not use the FPU.

use core::arch::global_asm;
use core::cell::{Cell, UnsafeCell};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;
use cortex_m_rt::exception;
use critical_section::Mutex;
use rtos_kernel::{
    fault, ContextSwitch, KernelError, Port, Quantum, RResult, ThreadEntry, ThreadId, MAX_THREADS,
};

/// Words PendSV and the hardware push for one saved context
const FRAME_WORDS: usize = 16;

/// Smallest stack that fits a saved context plus a little working room
pub const MIN_STACK_WORDS: usize = 64;

/// xPSR with only the Thumb bit set
const INITIAL_XPSR: u32 = 0x0100_0000;

static SWITCH: Mutex<Cell<Option<&'static dyn ContextSwitch<StackPointer>>>> =
    Mutex::new(Cell::new(None));

/// Context handed out by the first PendSV after launch
static FIRST: Mutex<Cell<Option<StackPointer>>> = Mutex::new(Cell::new(None));

/// Somewhere harmless for the first PendSV to push the boot context into
static BOOT_SCRATCH: Stack<FRAME_WORDS> = Stack::EMPTY;

/// Saved process stack pointer of a thread that is not running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPointer(*mut u32);

// SAFETY: a saved stack pointer is only dereferenced by PendSV when it
// resumes the owning thread.
unsafe impl Send for StackPointer {}

#[repr(C, align(8))]
struct Stack<const W: usize>(UnsafeCell<[u32; W]>);

impl<const W: usize> Stack<W> {
    const EMPTY: Self = Self(UnsafeCell::new([0; W]));

    fn top(&self) -> *mut u32 {
        self.0.get().cast::<u32>().wrapping_add(W)
    }
}

// SAFETY: a stack is written by `init_context` before launch, inside the
// kernel's critical section, and afterwards only by the thread that owns it
// and by PendSV on that thread's behalf.
unsafe impl<const W: usize> Sync for Stack<W> {}

/// Cortex-M port with `N` thread stacks of `STACK_WORDS` words each
pub struct CortexMPort<const N: usize, const STACK_WORDS: usize> {
    stacks: [Stack<STACK_WORDS>; N],
}

impl<const N: usize, const STACK_WORDS: usize> CortexMPort<N, STACK_WORDS> {
    pub const fn new() -> Self {
        assert!(N >= 1 && N <= MAX_THREADS, "thread count out of range");
        assert!(STACK_WORDS >= MIN_STACK_WORDS, "thread stacks too small");
        assert!(STACK_WORDS % 2 == 0, "stack tops must stay 8-byte aligned");
        Self {
            stacks: [Stack::EMPTY; N],
        }
    }
}

impl<const N: usize, const STACK_WORDS: usize> Default for CortexMPort<N, STACK_WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a thread lands if its entry point returns
extern "C" fn thread_returned() -> ! {
    fault(KernelError::ThreadReturned)
}

impl<const N: usize, const STACK_WORDS: usize> Port for CortexMPort<N, STACK_WORDS> {
    type Context = StackPointer;

    fn init_context(&self, id: ThreadId, entry: ThreadEntry) -> RResult<StackPointer> {
        let stack = self.stacks.get(id.index()).ok_or(KernelError::NoStack(id))?;

        // SAFETY: registration runs once per id before launch, so nothing
        // else is using this stack.
        let words = unsafe { &mut *stack.0.get() };
        let frame = &mut words[STACK_WORDS - FRAME_WORDS..];

        // R4-R11, then R0-R3 and R12, hold their own register number in
        // every byte so a stray read of an unset register is recognisable.
        for (slot, reg) in frame[..8].iter_mut().zip(4u32..) {
            *slot = reg * 0x0101_0101;
        }
        for (slot, reg) in frame[8..12].iter_mut().zip(0u32..) {
            *slot = reg * 0x0101_0101;
        }
        frame[12] = 0x1212_1212;
        frame[13] = thread_returned as usize as u32;
        // The stacked PC is a halfword address; Thumb state lives in xPSR.
        frame[14] = (entry as usize as u32) & !1;
        frame[15] = INITIAL_XPSR;

        Ok(StackPointer(frame.as_mut_ptr()))
    }

    fn start_first(
        &'static self,
        kernel: &'static dyn ContextSwitch<StackPointer>,
        first: StackPointer,
        quantum: Quantum,
    ) -> ! {
        critical_section::with(|cs| {
            SWITCH.borrow(cs).set(Some(kernel));
            FIRST.borrow(cs).set(Some(first));
        });

        // SAFETY: the kernel is the only user of SCB priorities and SysTick
        // once it has launched.
        let mut core = unsafe { cortex_m::Peripherals::steal() };
        unsafe {
            core.SCB.set_priority(SystemHandler::PendSV, 0xFF);
            core.SCB.set_priority(SystemHandler::SysTick, 0xFF);
            cortex_m::register::psp::write(BOOT_SCRATCH.top() as u32);
        }

        core.SYST.set_clock_source(SystClkSource::Core);
        core.SYST.set_reload(quantum.reload_value());
        core.SYST.clear_current();
        core.SYST.enable_interrupt();
        core.SYST.enable_counter();

        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        // SAFETY: PendSV is pending, so this resumes the first thread on the
        // process stack and main never runs again.
        unsafe { cortex_m::interrupt::enable() };
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn request_switch(&self) {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}

/// Called by PendSV with the outgoing thread's stack pointer, after R4-R11
/// were pushed; returns the stack pointer to resume.
#[no_mangle]
extern "C" fn rtos_cortex_m_switch(saved: *mut u32) -> *mut u32 {
    let (kernel, first) =
        critical_section::with(|cs| (SWITCH.borrow(cs).get(), FIRST.borrow(cs).take()));
    if let Some(StackPointer(first)) = first {
        return first;
    }
    match kernel {
        Some(kernel) => kernel.switch_context(StackPointer(saved)).0,
        None => saved,
    }
}

#[exception]
fn SysTick() {
    if let Some(kernel) = critical_section::with(|cs| SWITCH.borrow(cs).get()) {
        kernel.on_tick();
        SCB::set_pendsv();
    }
}

// Must not touch R4-R11 before they are saved: the hardware has stacked only
// R0-R3, R12, LR, PC and xPSR on the process stack.
global_asm!(
    ".section .text.PendSV,\"ax\",%progbits",
    ".global PendSV",
    ".type PendSV,%function",
    ".thumb_func",
    "PendSV:",
    "    mrs     r0, psp",
    "    stmdb   r0!, {{r4-r11}}",
    "    bl      rtos_cortex_m_switch",
    "    ldmia   r0!, {{r4-r11}}",
    "    msr     psp, r0",
    // return to thread mode on the process stack
    "    mvn     lr, #2",
    "    bx      lr",
    ".size PendSV, . - PendSV",
);
