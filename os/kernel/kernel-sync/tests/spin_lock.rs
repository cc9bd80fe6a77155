use kernel_sync::{RawSpin, SpinLock};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn raw_spin_is_a_plain_flag() {
    let raw = RawSpin::new();
    assert!(!raw.is_locked());
    assert!(raw.try_lock());
    assert!(raw.is_locked());
    assert!(!raw.try_lock(), "no owner tracking, so a second acquire fails");
    unsafe { raw.unlock() };
    assert!(!raw.is_locked());
    raw.lock();
    assert!(raw.is_locked());
    unsafe { raw.unlock() };
}

#[test]
fn raw_spin_hands_over_between_threads() {
    let raw = Arc::new(RawSpin::new());
    raw.lock();

    let waiter = {
        let raw = Arc::clone(&raw);
        thread::spawn(move || {
            raw.lock();
            unsafe { raw.unlock() };
        })
    };
    thread::sleep(std::time::Duration::from_millis(20));
    assert!(!waiter.is_finished());
    unsafe { raw.unlock() };
    waiter.join().unwrap();
    assert!(!raw.is_locked());
}

#[test]
fn guard_holds_the_flag() {
    let lock = SpinLock::new(7_u64);
    let guard = lock.lock();
    assert!(lock.is_locked());
    assert!(lock.try_lock().is_none());
    drop(guard);
    assert!(!lock.is_locked());
    assert_eq!(lock.try_lock().map(|g| *g), Some(7));
}

#[test]
fn into_inner_hands_back_the_state() {
    let lock = SpinLock::<Vec<u64>>::default();
    lock.with_lock(|frames| frames.extend([0x1000, 0x2000]));
    assert_eq!(lock.into_inner(), [0x1000, 0x2000]);
}

static IDS: SpinLock<Vec<u32>> = SpinLock::new(Vec::new());

#[test]
fn const_static_needs_no_init() {
    let handles: Vec<_> = (0..4)
        .map(|id| thread::spawn(move || IDS.with_lock(|ids| ids.push(id))))
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let mut ids = IDS.with_lock(|ids| ids.clone());
    ids.sort_unstable();
    assert_eq!(ids, [0, 1, 2, 3]);
}

/// Free frames plus outstanding reservations, guarded as one unit.
#[derive(Default)]
struct Pool {
    free: Vec<u64>,
    committed: usize,
}

impl Pool {
    fn available(&self) -> usize {
        self.free.len() - self.committed
    }
}

#[test]
fn pool_accounting_survives_contention() {
    const FRAMES: u64 = 64;
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let pool = Arc::new(SpinLock::new(Pool {
        free: (0..FRAMES).collect(),
        committed: 0,
    }));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..ROUNDS {
                    // Reserve, then take the reserved frame in a second critical section.
                    let reserved = pool.with_lock(|p| {
                        let ok = p.available() > 0;
                        p.committed += usize::from(ok);
                        ok
                    });
                    if !reserved {
                        continue;
                    }
                    let frame = pool.with_lock(|p| {
                        p.committed -= 1;
                        p.free.pop().expect("a reserved frame is always there")
                    });
                    thread::yield_now();
                    pool.with_lock(|p| p.free.push(frame));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let pool = Arc::into_inner(pool).unwrap().into_inner();
    assert_eq!(pool.committed, 0);
    let mut free = pool.free;
    free.sort_unstable();
    assert_eq!(free, (0..FRAMES).collect::<Vec<_>>());
}

#[test]
fn panicking_holder_releases_the_lock() {
    let lock = SpinLock::new(Pool::default());
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        lock.with_lock(|p| {
            p.committed = 3;
            panic!("allocation path failed");
        });
    }));
    assert!(result.is_err());
    assert!(!lock.is_locked());
    assert_eq!(lock.with_lock(|p| p.committed), 3);
}
