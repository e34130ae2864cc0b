//! Completion barrier: a counter that chunks "arrive at"; a waiter blocks
//! until the counter reaches zero. Supports a spin-only mode so a caller
//! thread that is about to immediately run its own chunk doesn't pay for a
//! mutex round-trip when the remaining workers are likely to finish first.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Whether `spin_wait` exhausted its spin budget before the barrier closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stalled(pub(crate) bool);

pub(crate) struct Barrier {
    counter: AtomicU32,
    spin: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Barrier {
    pub(crate) fn new(initial: u32) -> Self {
        Barrier {
            counter: AtomicU32::new(initial),
            spin: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Resets the counter to `n`. Must only be called before any arrivals
    /// for this round are published.
    pub(crate) fn initialize(&self, n: u32) {
        self.counter.store(n, Ordering::Release);
    }

    /// Registers one more expected arrival before its chunk has been published.
    pub(crate) fn add_expected_arrival(&self) {
        self.counter.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn use_spin_wait(&self, value: bool) {
        self.spin.store(value, Ordering::Relaxed);
    }

    pub(crate) fn actives(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    /// Called by a worker (or the caller) after finishing one chunk.
    pub(crate) fn arrive(&self) {
        if self.spin.load(Ordering::Relaxed) {
            let previous = self.counter.fetch_sub(1, Ordering::Release);
            debug_assert!(previous >= 1, "barrier arrived more times than expected");
            return;
        }

        let everyone_arrived = {
            let _guard = self.mutex.lock();
            let previous = self.counter.fetch_sub(1, Ordering::Relaxed);
            debug_assert!(previous >= 1, "barrier arrived more times than expected");
            previous == 1
        };
        if everyone_arrived {
            self.condvar.notify_one();
        }
    }

    /// Blocks on a condvar until the counter reaches zero. Only valid in
    /// block mode.
    pub(crate) fn wait(&self) {
        debug_assert!(!self.spin.load(Ordering::Relaxed));
        let mut guard = self.mutex.lock();
        while self.counter.load(Ordering::Relaxed) != 0 {
            self.condvar.wait(&mut guard);
        }
    }

    /// Spins for up to `spin_count` short pauses, then yields until the
    /// counter reaches zero. Only valid in spin mode.
    pub(crate) fn spin_wait(&self, spin_count: u32) -> Stalled {
        debug_assert!(self.spin.load(Ordering::Relaxed));

        for _ in 0..spin_count {
            if self.actives() == 0 {
                return Stalled(false);
            }
            std::hint::spin_loop();
        }

        while self.actives() != 0 {
            std::thread::yield_now();
        }
        Stalled(true)
    }
}

#[cfg(debug_assertions)]
impl Drop for Barrier {
    fn drop(&mut self) {
        debug_assert_eq!(self.counter.load(Ordering::Acquire), 0, "barrier dropped with pending arrivals");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn block_mode_wait_returns_after_all_arrive() {
        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let b = Arc::clone(&barrier);
                std::thread::spawn(move || b.arrive())
            })
            .collect();

        barrier.wait();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(barrier.actives(), 0);
    }

    #[test]
    fn spin_mode_reports_stall_when_budget_exhausted() {
        let barrier = Barrier::new(1);
        barrier.use_spin_wait(true);
        let stalled = barrier.spin_wait(4);
        assert_eq!(stalled, Stalled(true));
        barrier.arrive();
    }

    #[test]
    fn spin_mode_does_not_stall_if_arrival_is_prompt() {
        let barrier = Arc::new(Barrier::new(1));
        barrier.use_spin_wait(true);
        let b = Arc::clone(&barrier);
        std::thread::spawn(move || b.arrive()).join().unwrap();
        let stalled = barrier.spin_wait(1_000_000);
        assert_eq!(stalled, Stalled(false));
    }

    #[test]
    fn add_expected_arrival_extends_the_round() {
        let barrier = Barrier::new(1);
        barrier.add_expected_arrival();
        barrier.arrive();
        assert_eq!(barrier.actives(), 1);
        barrier.arrive();
        assert_eq!(barrier.actives(), 0);
    }
}
