//! Work-stealing MPMC queue built on `crossbeam_deque`.
//!
//! Each worker owns a `Worker<WorkItem>` (the original's "producer token":
//! only its owner pushes and LIFO-pops from it) whose `Stealer` handle is
//! shared so siblings and the caller thread can steal from it. A shared
//! `Injector<WorkItem>` is the overflow/shared queue used when exact-worker
//! targeting is unavailable (concurrent or recursive spreads).
//!
//! This directly generalizes the work-stealing scheme in
//! `maneatingape-advent-of-code-rust`'s `util::thread::ParIter`: there, each
//! thread owns a packed `(start, end)` cursor and steals the larger half of
//! whichever sibling has the most remaining work; here the same idea is
//! expressed with `crossbeam_deque`'s general-purpose work-stealing deque so
//! it applies to arbitrary closures rather than only slice indices.

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

/// One unit of work: either a parallel-for chunk or a fire-and-forget job.
pub(crate) type WorkItem = Box<dyn FnOnce() + Send>;

/// A worker's own deque plus the means for others to steal from it.
pub(crate) struct WorkerQueue {
    local: Worker<WorkItem>,
}

impl WorkerQueue {
    pub(crate) fn new() -> Self {
        WorkerQueue { local: Worker::new_lifo() }
    }

    pub(crate) fn stealer(&self) -> Stealer<WorkItem> {
        self.local.stealer()
    }

    pub(crate) fn push(&self, item: WorkItem) {
        self.local.push(item);
    }

    pub(crate) fn push_bulk(&self, items: impl IntoIterator<Item = WorkItem>) {
        for item in items {
            self.local.push(item);
        }
    }

    /// Pops from this worker's own deque without touching the shared queue.
    pub(crate) fn pop_own(&self) -> Option<WorkItem> {
        self.local.pop()
    }
}

impl Default for WorkerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared overflow queue plus every worker's stealer, used for the
/// shared-queue dispatch path and for cross-worker / caller work-stealing.
pub(crate) struct SharedQueue {
    injector: Injector<WorkItem>,
    stealers: Vec<Stealer<WorkItem>>,
}

impl SharedQueue {
    pub(crate) fn new(stealers: Vec<Stealer<WorkItem>>) -> Self {
        SharedQueue { injector: Injector::new(), stealers }
    }

    pub(crate) fn push(&self, item: WorkItem) {
        self.injector.push(item);
    }

    pub(crate) fn push_bulk(&self, items: impl IntoIterator<Item = WorkItem>) {
        for item in items {
            self.injector.push(item);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.injector.is_empty()
    }

    /// Tries to steal one item from the shared injector.
    pub(crate) fn steal_from_injector(&self) -> Option<WorkItem> {
        loop {
            match self.injector.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Tries to steal from the injector, then round-robins through sibling
    /// stealers starting at `start_index`. Used by idle workers.
    pub(crate) fn steal_any(&self, start_index: usize) -> Option<WorkItem> {
        if let Some(item) = self.steal_from_injector() {
            return Some(item);
        }

        let len = self.stealers.len();
        for offset in 0..len {
            let index = (start_index + offset) % len;
            loop {
                match self.stealers[index].steal() {
                    Steal::Success(item) => return Some(item),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }
}
