//! Scheduling and semaphore invariants for rtos-core

use rtos_core::{
    KernelError, Scheduler, SemaphoreId, SemaphoreState, SleepAccounting, ThreadId,
    ThreadRegistry, WaitOutcome,
};

fn sealed_ring<const N: usize>(threads: usize) -> ThreadRegistry<(), N> {
    let mut reg = ThreadRegistry::new();
    for _ in 0..threads {
        reg.register(|_| Ok(())).unwrap();
    }
    reg.seal().unwrap();
    reg
}

#[test]
fn test_every_runnable_thread_selected_within_one_traversal() {
    const K: usize = 5;
    let mut reg: ThreadRegistry<(), 8> = sealed_ring(K);
    let sched = Scheduler::default();

    for _round in 0..4 {
        let mut seen = [false; K];
        for _ in 0..K {
            let next = sched.schedule(&mut reg, 1).unwrap();
            seen[next.index()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}

#[test]
fn test_fairness_with_some_threads_blocked() {
    let mut reg: ThreadRegistry<(), 8> = sealed_ring(6);
    let mut sema = SemaphoreState::uninit();
    sema.init(SemaphoreId::new(3).unwrap(), 0).unwrap();
    sema.wait(&mut reg, ThreadId::new(2)).unwrap();
    sema.wait(&mut reg, ThreadId::new(4)).unwrap();
    let sched = Scheduler::default();

    let runnable = [0u8, 1, 3, 5];
    let mut counts = [0u32; 6];
    for _ in 0..runnable.len() * 10 {
        counts[sched.schedule(&mut reg, 1).unwrap().index()] += 1;
    }
    for id in runnable {
        assert_eq!(counts[id as usize], 10);
    }
    assert_eq!(counts[2], 0);
    assert_eq!(counts[4], 0);

    // a signalled thread rejoins the rotation at its ring position
    assert_eq!(sema.signal(&mut reg), Ok(Some(ThreadId::new(2))));
    let picked: Vec<_> = (0..5)
        .map(|_| sched.schedule(&mut reg, 1).unwrap().raw())
        .collect();
    assert!(picked.contains(&2));
    assert!(!picked.contains(&4));
}

#[test]
fn test_semaphore_value_tracks_waits_and_signals() {
    let mut reg: ThreadRegistry<(), 8> = sealed_ring(4);
    let mut sema = SemaphoreState::uninit();
    let initial = 1;
    sema.init(SemaphoreId::new(1).unwrap(), initial).unwrap();

    let (mut waits, mut signals) = (0i32, 0i32);
    let ops = [
        Some(0u8),
        Some(1),
        Some(2),
        None,
        Some(3),
        None,
        None,
        None,
        None,
    ];
    for op in ops {
        match op {
            Some(t) => {
                sema.wait(&mut reg, ThreadId::new(t)).unwrap();
                waits += 1;
            }
            None => {
                sema.signal(&mut reg).unwrap();
                signals += 1;
            }
        }
        assert_eq!(sema.value(), initial + signals - waits);
        assert_eq!(sema.waiter_count() as i32, (-sema.value()).max(0));
        let blocked = reg.iter().filter(|t| t.blocked_on().is_some()).count();
        assert_eq!(blocked, sema.waiter_count());
    }
}

#[test]
fn test_blocked_thread_never_scheduled() {
    let mut reg: ThreadRegistry<(), 4> = sealed_ring(2);
    let mut sema = SemaphoreState::uninit();
    sema.init(SemaphoreId::new(1).unwrap(), 0).unwrap();
    assert_eq!(
        sema.wait(&mut reg, ThreadId::new(1)),
        Ok(WaitOutcome::Blocked)
    );
    let sched = Scheduler::default();

    for _ in 0..10 {
        assert_eq!(sched.schedule(&mut reg, 1), Ok(ThreadId::new(0)));
    }
    sema.wait(&mut reg, ThreadId::new(0)).unwrap();
    assert_eq!(sched.schedule(&mut reg, 1), Err(KernelError::NoRunnableThread));
}

#[test]
fn test_sleep_lasts_at_least_the_requested_ticks() {
    for ticks in 1..6u32 {
        let mut reg: ThreadRegistry<(), 4> = sealed_ring(2);
        reg.tcb_mut(ThreadId::new(1)).unwrap().sleep_for(ticks);
        let sched = Scheduler::new(SleepAccounting::TicksOnly);

        let mut elapsed = 0;
        // interleave yields (no tick) with ticks
        loop {
            let next = sched.schedule(&mut reg, 0).unwrap();
            if next == ThreadId::new(1) {
                break;
            }
            let next = sched.schedule(&mut reg, 1).unwrap();
            elapsed += 1;
            if next == ThreadId::new(1) {
                break;
            }
        }
        assert!(elapsed >= ticks, "woke after {elapsed} of {ticks} ticks");
    }
}
