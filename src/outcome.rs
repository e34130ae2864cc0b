//! `dispatch`'s future-equivalent: a hand-rolled one-shot promise/future pair.
//!
//! The original library returns a `boost::future<R>` backed by its own small
//! executor integration. Pulling in an async runtime here would mean
//! dragging a reactor into a purely synchronous thread pool for the sake of
//! a single one-shot value, so `Outcome<R>` is instead a blocking handle:
//! `join` parks the calling thread on a `parking_lot` condvar exactly the
//! way [`crate::barrier::Barrier`] does, which keeps the whole crate on one
//! synchronization idiom.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::error::DispatchError;

enum Slot<R> {
    Pending,
    Ready(R),
    Panicked,
    EnqueueFailed,
}

struct Shared<R> {
    slot: Mutex<Slot<R>>,
    condvar: Condvar,
}

/// The worker-side handle used to publish a result or a panic.
pub(crate) struct OutcomeSender<R> {
    shared: Arc<Shared<R>>,
}

/// The caller-side handle used to block for the result.
pub struct Outcome<R> {
    shared: Arc<Shared<R>>,
}

/// Creates a linked sender/outcome pair for one dispatched unit of work.
pub(crate) fn pair<R>() -> (OutcomeSender<R>, Outcome<R>) {
    let shared = Arc::new(Shared { slot: Mutex::new(Slot::Pending), condvar: Condvar::new() });
    (OutcomeSender { shared: Arc::clone(&shared) }, Outcome { shared })
}

impl<R> OutcomeSender<R> {
    pub(crate) fn send(self, value: R) {
        let mut slot = self.shared.slot.lock();
        *slot = Slot::Ready(value);
        drop(slot);
        self.shared.condvar.notify_all();
    }

    pub(crate) fn send_panicked(self) {
        let mut slot = self.shared.slot.lock();
        *slot = Slot::Panicked;
        drop(slot);
        self.shared.condvar.notify_all();
    }

    /// Runs `work`, catching panics so a single failed job cannot poison the
    /// worker thread, and publishes whichever outcome resulted.
    pub(crate) fn complete_with(self, work: impl FnOnce() -> R + std::panic::UnwindSafe) {
        match std::panic::catch_unwind(work) {
            Ok(value) => self.send(value),
            Err(_) => self.send_panicked(),
        }
    }
}

impl<R> Drop for OutcomeSender<R> {
    /// A sender dropped without ever sending means the work it was meant to
    /// wrap was never enqueued (e.g. rejected by a `max_queue_depth` cap).
    /// Without this, `Outcome::join` would block forever waiting on a result
    /// that will never arrive.
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock();
        if matches!(&*slot, Slot::Pending) {
            *slot = Slot::EnqueueFailed;
            drop(slot);
            self.shared.condvar.notify_all();
        }
    }
}

impl<R> Outcome<R> {
    /// Blocks the calling thread until the dispatched work completes.
    pub fn join(self) -> Result<R, DispatchError> {
        let mut slot = self.shared.slot.lock();
        loop {
            match &*slot {
                Slot::Pending => self.shared.condvar.wait(&mut slot),
                Slot::Ready(_) => {
                    let Slot::Ready(value) = std::mem::replace(&mut *slot, Slot::Pending) else {
                        unreachable!()
                    };
                    return Ok(value);
                }
                Slot::Panicked => return Err(DispatchError::WorkerPanicked),
                Slot::EnqueueFailed => return Err(DispatchError::QueueFull),
            }
        }
    }

    /// Returns the result if it is already available without blocking.
    pub fn try_join(&self) -> Option<Result<R, DispatchError>>
    where
        R: Clone,
    {
        let slot = self.shared.slot.lock();
        match &*slot {
            Slot::Pending => None,
            Slot::Ready(value) => Some(Ok(value.clone())),
            Slot::Panicked => Some(Err(DispatchError::WorkerPanicked)),
            Slot::EnqueueFailed => Some(Err(DispatchError::QueueFull)),
        }
    }
}
