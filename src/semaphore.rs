//! Counting semaphore with spin-then-block wait and batched release.
//!
//! The fast path (`wait`/`wait_spinning` on a semaphore that already has
//! permits) only touches an atomic counter; the slow paths fall back to a
//! `parking_lot` mutex/condvar pair. `parking_lot` was chosen over
//! `std::sync` for the same reason `paraphym_simd` reaches for it: no
//! poisoning to thread through every lock site, and a smaller uncontended
//! fast path.
//!
//! `signal()` always checks the waiters count under the lock rather than
//! branching on the sign of `value`: `try_take` never lets `value` go
//! negative, so a signed "contested" sentinel can't distinguish "no one is
//! waiting" from "a waiter is about to park" — only the waiters count can.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI32, Ordering};

pub(crate) struct Semaphore {
    value: AtomicI32,
    waiters: Mutex<u32>,
    condvar: Condvar,
}

impl Semaphore {
    pub(crate) fn new(initial: i32) -> Self {
        Semaphore { value: AtomicI32::new(initial), waiters: Mutex::new(0), condvar: Condvar::new() }
    }

    /// Adds `count` permits and wakes parked waiters.
    pub(crate) fn signal(&self, count: u32) {
        debug_assert!(count > 0);
        self.value.fetch_add(count as i32, Ordering::Release);

        let waiters = self.waiters.lock();
        if *waiters == 0 {
            return;
        }
        drop(waiters);
        if count == 1 {
            self.condvar.notify_one();
        } else {
            self.condvar.notify_all();
        }
    }

    /// Blocks until a permit is available, parking immediately on contention.
    pub(crate) fn wait(&self) {
        self.wait_spinning(0);
    }

    /// Spins up to `spin_count` times before falling back to a blocking wait.
    pub(crate) fn wait_spinning(&self, spin_count: u32) {
        for _ in 0..spin_count {
            if self.try_take() {
                return;
            }
            std::hint::spin_loop();
        }

        loop {
            if self.try_take() {
                return;
            }

            let mut waiters = self.waiters.lock();
            // Re-check under the lock: a signal() between the spin loop above
            // and acquiring the lock must not be lost.
            if self.try_take() {
                return;
            }
            *waiters += 1;
            self.condvar.wait(&mut waiters);
            *waiters -= 1;
        }
    }

    fn try_take(&self) -> bool {
        self.value
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |v| (v > 0).then_some(v - 1))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn signal_then_wait_does_not_block() {
        let sem = Semaphore::new(0);
        sem.signal(1);
        sem.wait();
    }

    #[test]
    fn wait_blocks_until_signaled() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = Arc::clone(&sem);
        let handle = std::thread::spawn(move || waiter.wait());

        std::thread::sleep(Duration::from_millis(20));
        sem.signal(1);
        handle.join().unwrap();
    }

    #[test]
    fn batched_signal_wakes_multiple_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&sem);
                std::thread::spawn(move || s.wait())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        sem.signal(4);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn signal_wakes_a_waiter_already_parked_on_the_condvar() {
        // Deterministic version of `wait_blocks_until_signaled`: instead of
        // sleeping and hoping the waiter reached the condvar first, poll
        // `waiters` until it actually parked before signaling. This is the
        // exact case the sign-of-`value` check in `signal()` used to miss.
        let sem = Arc::new(Semaphore::new(0));
        let waiter = Arc::clone(&sem);
        let handle = std::thread::spawn(move || waiter.wait());

        for _ in 0..10_000 {
            if *sem.waiters.lock() == 1 {
                break;
            }
            std::thread::yield_now();
        }
        assert_eq!(*sem.waiters.lock(), 1, "waiter never reached the condvar");

        sem.signal(1);
        handle.join().unwrap();
    }
}
