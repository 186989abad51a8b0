use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtos_core::{Scheduler, SemaphoreId, SemaphoreState, ThreadId, ThreadRegistry, MAX_THREADS};

fn full_ring() -> ThreadRegistry<(), MAX_THREADS> {
    let mut reg = ThreadRegistry::new();
    for _ in 0..MAX_THREADS {
        reg.register(|_| Ok(())).unwrap();
    }
    reg.seal().unwrap();
    reg
}

fn bench_schedule(c: &mut Criterion) {
    let sched = Scheduler::default();

    let mut reg = full_ring();
    c.bench_function("schedule_all_runnable", |b| {
        b.iter(|| sched.schedule(black_box(&mut reg), 1))
    });

    // runnable threads at both ends of the ring, sleepers in between
    let mut reg = full_ring();
    for n in 1..MAX_THREADS as u8 - 1 {
        reg.tcb_mut(ThreadId::new(n)).unwrap().sleep_for(u32::MAX);
    }
    c.bench_function("schedule_mostly_sleeping", |b| {
        b.iter(|| sched.schedule(black_box(&mut reg), 0))
    });
}

fn bench_semaphore(c: &mut Criterion) {
    let mut reg = full_ring();
    let mut sema = SemaphoreState::uninit();
    sema.init(SemaphoreId::new(1).unwrap(), 0).unwrap();

    c.bench_function("semaphore_block_and_wake", |b| {
        b.iter(|| {
            sema.wait(&mut reg, ThreadId::new(0)).unwrap();
            sema.signal(&mut reg).unwrap()
        })
    });
}

criterion_group!(benches, bench_schedule, bench_semaphore);
criterion_main!(benches);
