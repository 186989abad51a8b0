//! The kernel context
//!
//! All scheduling state lives in one [`Kernel`] value, normally a `static`,
//! behind a critical-section mutex. Thread-facing operations enter the
//! critical section, update thread and semaphore state, leave it, and only
//! then ask the port for a switch.

use core::cell::RefCell;
use core::num::NonZeroU16;

use critical_section::Mutex;
use heapless::Vec;
use log::{debug, info, trace};
use rtos_core::{
    enter_critical, fault, KernelError, Quantum, RResult, Scheduler, SemaphoreId,
    SemaphoreState, ThreadEntry, ThreadId, ThreadRegistry, ThreadStatus, Tick, WaitOutcome,
    MAX_THREADS,
};

use crate::config::KernelConfig;
use crate::mailbox::Mailbox;
use crate::port::{ContextSwitch, Port};
use crate::sync::{BinarySemaphore, Semaphore};

struct KernelState<C, const N: usize> {
    registry: ThreadRegistry<C, N>,
    scheduler: Scheduler,
    /// Ticks since the last scheduling decision
    pending_ticks: u32,
    now: Tick,
    last_sema: Option<NonZeroU16>,
}

impl<C: Copy, const N: usize> KernelState<C, N> {
    fn current(&self) -> RResult<ThreadId> {
        self.registry.current().ok_or(KernelError::NotLaunched)
    }

    /// Ids count up from 1 and wrap back to 1, never 0.
    fn allocate_sema_id(&mut self) -> SemaphoreId {
        let next = self
            .last_sema
            .and_then(|last| last.checked_add(1))
            .unwrap_or(NonZeroU16::MIN);
        self.last_sema = Some(next);
        SemaphoreId::from(next)
    }
}

/// Round-robin kernel for up to `N` threads, running on port `P`
pub struct Kernel<P: Port, const N: usize> {
    port: P,
    config: KernelConfig,
    state: Mutex<RefCell<KernelState<P::Context, N>>>,
}

impl<P: Port, const N: usize> Kernel<P, N> {
    pub const fn new(port: P, config: KernelConfig) -> Self {
        assert!(N >= 1 && N <= MAX_THREADS, "thread capacity out of range");
        Self {
            port,
            config,
            state: Mutex::new(RefCell::new(KernelState {
                registry: ThreadRegistry::new(),
                scheduler: Scheduler::new(config.sleep_accounting),
                pending_ticks: 0,
                now: Tick::ZERO,
                last_sema: None,
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut KernelState<P::Context, N>) -> R) -> R {
        let guard = enter_critical();
        let mut state = self.state.borrow_ref_mut(guard.token());
        f(&mut state)
    }

    fn with_semaphore<R>(
        &self,
        sema: &Semaphore,
        f: impl FnOnce(&mut KernelState<P::Context, N>, &mut SemaphoreState) -> R,
    ) -> R {
        let guard = enter_critical();
        let mut state = self.state.borrow_ref_mut(guard.token());
        let mut sema = sema.state.borrow_ref_mut(guard.token());
        f(&mut state, &mut sema)
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // Registration

    /// Register one thread. Threads run in registration order.
    pub fn add_thread(&self, entry: ThreadEntry) -> RResult<ThreadId> {
        let id = self.with_state(|st| {
            st.registry
                .register(|id| self.port.init_context(id, entry))
        })?;
        debug!("{}: registered {}", self.config.name, id);
        Ok(id)
    }

    /// Register a batch of threads, all or none.
    ///
    /// If the port cannot prepare one of them, the threads of this batch
    /// registered before it are removed again.
    pub fn add_threads(&self, entries: &[ThreadEntry]) -> RResult<()> {
        if entries.is_empty() {
            return Err(KernelError::NoThreads);
        }
        self.with_state(|st| {
            if st.registry.is_sealed() {
                return Err(KernelError::AlreadyLaunched);
            }
            let before = st.registry.len();
            if before + entries.len() > N {
                return Err(KernelError::RegistryFull { capacity: N });
            }
            for &entry in entries {
                if let Err(err) = st
                    .registry
                    .register(|id| self.port.init_context(id, entry))
                {
                    st.registry.truncate(before);
                    return Err(err);
                }
            }
            Ok(())
        })?;
        debug!("{}: registered {} threads", self.config.name, entries.len());
        Ok(())
    }

    /// Register the thread that runs when every other thread is blocked or
    /// sleeping. It must never block or sleep itself.
    pub fn set_idle(&self, entry: ThreadEntry) -> RResult<ThreadId> {
        let id = self.with_state(|st| {
            st.registry
                .register_idle(|id| self.port.init_context(id, entry))
        })?;
        debug!("{}: idle thread is {}", self.config.name, id);
        Ok(id)
    }

    /// Set a counting semaphore's initial value.
    ///
    /// Re-initializing a semaphore that threads are blocked on is a kernel
    /// fault.
    pub fn init_semaphore(&self, sema: &Semaphore, value: i32) {
        let result = self.with_semaphore(sema, |st, s| {
            let id = s.id().unwrap_or_else(|_| st.allocate_sema_id());
            s.init(id, value)
        });
        if let Err(err) = result {
            fault(err);
        }
    }

    /// Empty a mailbox and initialize its semaphores.
    pub fn init_mailbox<T: Copy + Send, const M: usize>(&self, mailbox: &Mailbox<T, M>) {
        mailbox.reset(self);
    }

    // Launch

    /// Close registration and return the first thread's context.
    pub fn begin_launch(&self) -> RResult<P::Context> {
        let (first, context, threads) = self.with_state(|st| {
            let first = st.registry.seal()?;
            let tcb = st
                .registry
                .get(first)
                .ok_or(KernelError::UnknownThread(first))?;
            Ok::<_, KernelError>((first, tcb.saved_context(), st.registry.len()))
        })?;
        info!(
            "{}: launching {} threads, first {}",
            self.config.name, threads, first
        );
        Ok(context)
    }

    /// Start scheduling. Never returns.
    ///
    /// Launching twice, or with no threads, is a kernel fault.
    pub fn launch(&'static self, quantum: Quantum) -> ! {
        match self.begin_launch() {
            Ok(first) => self.port.start_first(self, first, quantum),
            Err(err) => fault(err),
        }
    }

    pub fn is_launched(&self) -> bool {
        self.with_state(|st| st.registry.is_sealed())
    }

    // Thread operations

    /// Give up the CPU to the next runnable thread. Before launch this does
    /// nothing.
    pub fn yield_now(&self) {
        if self.is_launched() {
            self.port.request_switch();
        }
    }

    /// Same as [`yield_now`](Self::yield_now).
    pub fn suspend(&self) {
        self.yield_now();
    }

    /// Sleep for at least `ticks` scheduler ticks. `sleep(0)` is a yield.
    pub fn sleep(&self, ticks: u32) {
        if ticks > 0 {
            let result = self.with_state(|st| {
                let current = st.current()?;
                st.registry.tcb_mut(current)?.sleep_for(ticks);
                Ok::<_, KernelError>(current)
            });
            match result {
                Ok(current) => trace!("{} sleeps {} ticks", current, ticks),
                Err(err) => fault(err),
            }
        }
        self.yield_now();
    }

    /// Take one unit from `sema`, blocking until one is available.
    pub fn wait(&self, sema: &Semaphore) {
        let result = self.with_semaphore(sema, |st, s| {
            let current = st.current()?;
            let outcome = s.wait(&mut st.registry, current)?;
            Ok::<_, KernelError>((current, outcome, s.id()?))
        });
        match result {
            Ok((_, WaitOutcome::Acquired, _)) => {}
            Ok((current, WaitOutcome::Blocked, id)) => {
                trace!("{} blocked on semaphore {}", current, id.raw());
                // Returns once a signal has unblocked us and we are
                // scheduled again.
                self.yield_now();
            }
            Err(err) => fault(err),
        }
    }

    /// Take one unit from `sema` if one is available.
    pub fn try_wait(&self, sema: &Semaphore) -> bool {
        match self.with_semaphore(sema, |_, s| s.try_wait()) {
            Ok(taken) => taken,
            Err(err) => fault(err),
        }
    }

    /// Release one unit to `sema`. The oldest waiter, if any, becomes
    /// runnable; the caller keeps the CPU.
    pub fn signal(&self, sema: &Semaphore) {
        match self.with_semaphore(sema, |st, s| s.signal(&mut st.registry)) {
            Ok(Some(woken)) => trace!("{} unblocked", woken),
            Ok(None) => {}
            Err(err) => fault(err),
        }
    }

    /// Take a binary semaphore, yielding until it is free.
    pub fn bwait(&self, sema: &BinarySemaphore) {
        while !sema.try_take() {
            self.yield_now();
        }
    }

    /// Release a binary semaphore.
    pub fn bsignal(&self, sema: &BinarySemaphore) {
        sema.give();
    }

    // Queries

    /// Ticks since launch
    pub fn now(&self) -> Tick {
        self.with_state(|st| st.now)
    }

    pub fn uptime_millis(&self) -> u64 {
        self.now().as_millis(self.config.tick_hz)
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.with_state(|st| st.registry.current())
    }

    /// Registered threads, idle included
    pub fn thread_count(&self) -> usize {
        self.with_state(|st| st.registry.len())
    }

    pub fn snapshot(&self) -> Vec<ThreadStatus, N> {
        self.with_state(|st| st.registry.snapshot())
    }
}

impl<P: Port, const N: usize> ContextSwitch<P::Context> for Kernel<P, N> {
    fn on_tick(&self) {
        self.with_state(|st| {
            st.now.increment();
            st.pending_ticks = st.pending_ticks.saturating_add(1);
        });
    }

    fn switch_context(&self, saved: P::Context) -> P::Context {
        let next = self.with_state(|st| {
            let current = st.current()?;
            st.registry.tcb_mut(current)?.save_context(saved);

            let elapsed = core::mem::take(&mut st.pending_ticks);
            let next = st.scheduler.schedule(&mut st.registry, elapsed)?;
            st.registry
                .get(next)
                .map(|tcb| tcb.saved_context())
                .ok_or(KernelError::UnknownThread(next))
        });
        match next {
            Ok(context) => context,
            Err(err) => fault(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use rtos_core::{PutPolicy, SleepAccounting};

    /// Port that records switch requests instead of switching.
    struct MockPort {
        switches: AtomicUsize,
        stacks: u8,
    }

    impl MockPort {
        const fn new() -> Self {
            Self::with_stacks(u8::MAX)
        }

        /// Port that can only prepare threads `0..stacks`
        const fn with_stacks(stacks: u8) -> Self {
            Self {
                switches: AtomicUsize::new(0),
                stacks,
            }
        }

        fn switches(&self) -> usize {
            self.switches.load(Ordering::SeqCst)
        }
    }

    impl Port for MockPort {
        type Context = u8;

        fn init_context(&self, id: ThreadId, _entry: ThreadEntry) -> RResult<u8> {
            if id.raw() >= self.stacks {
                return Err(KernelError::NoStack(id));
            }
            Ok(id.raw())
        }

        fn start_first(
            &'static self,
            _kernel: &'static dyn ContextSwitch<u8>,
            _first: u8,
            _quantum: Quantum,
        ) -> ! {
            unreachable!("mock port cannot run threads")
        }

        fn request_switch(&self) {
            self.switches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entry() -> ! {
        loop {}
    }

    fn kernel<const N: usize>() -> Kernel<MockPort, N> {
        Kernel::new(MockPort::new(), KernelConfig::new())
    }

    #[test]
    fn add_threads_is_all_or_nothing() {
        let k = kernel::<3>();
        k.add_thread(entry).unwrap();
        assert_eq!(
            k.add_threads(&[entry, entry, entry]),
            Err(KernelError::RegistryFull { capacity: 3 })
        );
        assert_eq!(k.thread_count(), 1);
        assert_eq!(k.add_threads(&[]), Err(KernelError::NoThreads));
        assert_eq!(k.add_threads(&[entry, entry]), Ok(()));
        assert_eq!(k.thread_count(), 3);
    }

    #[test]
    fn add_threads_rolls_back_when_port_runs_out_of_stacks() {
        let k: Kernel<MockPort, 4> = Kernel::new(MockPort::with_stacks(2), KernelConfig::new());
        assert_eq!(
            k.add_threads(&[entry, entry, entry]),
            Err(KernelError::NoStack(ThreadId::new(2)))
        );
        assert_eq!(k.thread_count(), 0);
        assert!(k.snapshot().is_empty());

        k.add_threads(&[entry, entry]).unwrap();
        let mut ctx = k.begin_launch().unwrap();
        for expected in [1, 0, 1] {
            ctx = k.switch_context(ctx);
            assert_eq!(ctx, expected);
        }
    }

    #[test]
    fn add_threads_rollback_keeps_earlier_registrations() {
        let k: Kernel<MockPort, 4> = Kernel::new(MockPort::with_stacks(3), KernelConfig::new());
        k.add_thread(entry).unwrap();
        assert_eq!(
            k.add_threads(&[entry, entry, entry]),
            Err(KernelError::NoStack(ThreadId::new(3)))
        );
        assert_eq!(k.thread_count(), 1);

        let ctx = k.begin_launch().unwrap();
        assert_eq!(k.switch_context(ctx), 0);
    }

    #[test]
    fn semaphore_ids_wrap_past_zero() {
        static FIRST: Semaphore = Semaphore::new();
        static SECOND: Semaphore = Semaphore::new();
        let k = kernel::<1>();
        k.with_state(|st| st.last_sema = NonZeroU16::new(u16::MAX - 1));

        k.init_semaphore(&FIRST, 0);
        k.init_semaphore(&SECOND, 0);
        let id_of = |sema: &Semaphore| {
            critical_section::with(|cs| sema.state.borrow_ref(cs).id().unwrap().raw())
        };
        assert_eq!(id_of(&FIRST), u16::MAX);
        assert_eq!(id_of(&SECOND), 1);

        // re-initializing keeps the id and does not allocate a new one
        k.init_semaphore(&FIRST, 3);
        assert_eq!(id_of(&FIRST), u16::MAX);
        assert_eq!(FIRST.value(), 3);
        assert_eq!(k.with_state(|st| st.last_sema), NonZeroU16::new(1));
    }

    #[test]
    #[should_panic(expected = "kernel fault")]
    fn reinit_of_semaphore_with_waiters_faults() {
        static BUSY: Semaphore = Semaphore::new();
        let k = kernel::<2>();
        k.add_threads(&[entry, entry]).unwrap();
        k.init_semaphore(&BUSY, 0);
        k.begin_launch().unwrap();

        k.wait(&BUSY);
        assert_eq!(BUSY.waiter_count(), 1);
        k.init_semaphore(&BUSY, 1);
    }

    #[test]
    fn launch_seals_registration() {
        let k = kernel::<4>();
        assert_eq!(k.begin_launch(), Err(KernelError::NoThreads));
        k.add_threads(&[entry, entry]).unwrap();

        assert_eq!(k.begin_launch(), Ok(0));
        assert!(k.is_launched());
        assert_eq!(k.current_thread(), Some(ThreadId::new(0)));
        assert_eq!(k.begin_launch(), Err(KernelError::AlreadyLaunched));
        assert_eq!(k.add_thread(entry), Err(KernelError::AlreadyLaunched));
        assert_eq!(k.add_threads(&[entry]), Err(KernelError::AlreadyLaunched));
    }

    #[test]
    fn yield_before_launch_is_a_no_op() {
        let k = kernel::<2>();
        k.add_thread(entry).unwrap();
        k.yield_now();
        assert_eq!(k.port().switches(), 0);

        k.begin_launch().unwrap();
        k.suspend();
        assert_eq!(k.port().switches(), 1);
    }

    #[test]
    fn switch_rotates_and_counts_ticks() {
        let k = kernel::<3>();
        k.add_threads(&[entry, entry, entry]).unwrap();
        let mut ctx = k.begin_launch().unwrap();

        for expected in [1, 2, 0, 1] {
            k.on_tick();
            ctx = k.switch_context(ctx);
            assert_eq!(ctx, expected);
        }
        assert_eq!(k.now(), Tick::new(4));
        assert_eq!(k.uptime_millis(), 8);
    }

    #[test]
    fn sleep_skips_thread_for_its_ticks() {
        let k = kernel::<2>();
        k.add_threads(&[entry, entry]).unwrap();
        let mut ctx = k.begin_launch().unwrap();

        k.sleep(2);
        assert_eq!(k.port().switches(), 1);
        ctx = k.switch_context(ctx);
        assert_eq!(ctx, 1);

        k.on_tick();
        ctx = k.switch_context(ctx);
        assert_eq!(ctx, 1);
        k.on_tick();
        ctx = k.switch_context(ctx);
        assert_eq!(ctx, 0);
    }

    #[test]
    fn every_decision_accounting_shortens_sleep_on_yield() {
        let k: Kernel<MockPort, 1> = Kernel::new(
            MockPort::new(),
            KernelConfig::new().with_sleep_accounting(SleepAccounting::EveryDecision),
        );
        k.add_thread(entry).unwrap();
        let ctx = k.begin_launch().unwrap();

        // the decision itself counts as a tick, so the lone sleeper is
        // runnable again straight away
        k.sleep(1);
        assert_eq!(k.switch_context(ctx), 0);
    }

    #[test]
    fn blocked_wait_requests_switch_and_signal_unblocks() {
        static SEMA: Semaphore = Semaphore::new();
        let k = kernel::<2>();
        k.add_threads(&[entry, entry]).unwrap();
        k.init_semaphore(&SEMA, 1);
        let ctx = k.begin_launch().unwrap();

        k.wait(&SEMA);
        assert_eq!(k.port().switches(), 0);
        k.wait(&SEMA);
        assert_eq!(k.port().switches(), 1);
        assert_eq!(SEMA.value(), -1);

        let snap = k.snapshot();
        assert!(!snap[0].runnable);
        assert!(snap[0].blocked_on.is_some());

        // thread 1 runs and signals
        assert_eq!(k.switch_context(ctx), 1);
        k.signal(&SEMA);
        assert_eq!(SEMA.value(), 0);
        assert!(k.snapshot()[0].runnable);
        assert!(!k.try_wait(&SEMA));
    }

    #[test]
    fn binary_semaphore_without_contention() {
        static LOCK: BinarySemaphore = BinarySemaphore::new(true);
        let k = kernel::<1>();
        k.add_thread(entry).unwrap();
        k.begin_launch().unwrap();

        k.bwait(&LOCK);
        assert!(!LOCK.is_available());
        k.bsignal(&LOCK);
        assert!(LOCK.is_available());
        assert_eq!(k.port().switches(), 0);
    }

    #[test]
    fn lossy_mailbox_counts_dropped_values() {
        static MAIL: Mailbox<u32, 1> = Mailbox::new(PutPolicy::Lossy);
        let k = kernel::<1>();
        k.add_thread(entry).unwrap();
        k.init_mailbox(&MAIL);
        k.begin_launch().unwrap();

        assert_eq!(MAIL.put(&k, 5), Ok(()));
        assert_eq!(MAIL.put(&k, 7), Err(KernelError::MailboxFull));
        assert_eq!(MAIL.lost(), 1);
        assert_eq!(MAIL.peek_next(), Some(5));
        assert_eq!(MAIL.get(&k), 5);
        assert_eq!(MAIL.peek_next(), None);
        assert!(MAIL.is_empty());
    }
}
