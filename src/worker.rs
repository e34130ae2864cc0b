//! Worker threads: a long-lived, non-scoped generalization of
//! `maneatingape-advent-of-code-rust`'s `spawn`/`util::thread` helpers. Where
//! the teacher spins up exactly `available_parallelism` scoped threads for
//! the lifetime of a single parallel iterator, a [`Dispatcher`](crate::Dispatcher)
//! keeps its threads alive across many `spread`/`fire_and_forget` calls, so
//! each one runs a loop instead of a single task and is woken by a
//! [`Semaphore`] rather than joined.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use crossbeam_deque::Stealer;

use crate::queue::{SharedQueue, WorkItem, WorkerQueue};
use crate::semaphore::Semaphore;

/// Handle a [`crate::Dispatcher`] keeps for each worker thread it owns.
pub(crate) struct WorkerHandle {
    pub(crate) thread_id: ThreadId,
    pub(crate) wakeup: Arc<Semaphore>,
    /// Linux thread id (`gettid`), published by the worker itself right
    /// after spawn so `Dispatcher::set_priority` can call `setpriority` on
    /// the thread rather than the whole process. `0` until published, `-1`
    /// on platforms without a per-thread priority concept.
    pub(crate) os_tid: Arc<AtomicI32>,
    join_handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns `count` worker threads, each running [`worker_loop`]. Returns the
/// handles the dispatcher keeps plus the shared queue wired up with every
/// worker's stealer.
pub(crate) fn spawn_pool(
    count: u16,
    spin_count: u32,
    exit: &Arc<AtomicBool>,
) -> std::io::Result<(Vec<WorkerHandle>, Arc<SharedQueue>)> {
    let local_queues: Vec<WorkerQueue> = (0..count).map(|_| WorkerQueue::new()).collect();
    let stealers: Vec<Stealer<WorkItem>> = local_queues.iter().map(WorkerQueue::stealer).collect();
    let shared = Arc::new(SharedQueue::new(stealers.clone()));

    let mut handles = Vec::with_capacity(count as usize);
    for (index, local) in local_queues.into_iter().enumerate() {
        let wakeup = Arc::new(Semaphore::new(0));
        let os_tid = Arc::new(AtomicI32::new(0));
        let shared_for_worker = Arc::clone(&shared);
        let wakeup_for_worker = Arc::clone(&wakeup);
        let exit_for_worker = Arc::clone(exit);
        let os_tid_for_worker = Arc::clone(&os_tid);

        let join_handle = std::thread::Builder::new().name(format!("burstwork-worker-{index}")).spawn(move || {
            publish_os_tid(&os_tid_for_worker);
            worker_loop(local, shared_for_worker, wakeup_for_worker, exit_for_worker, spin_count)
        })?;

        handles.push(WorkerHandle {
            thread_id: join_handle.thread().id(),
            wakeup,
            os_tid,
            join_handle: Some(join_handle),
        });
    }

    Ok((handles, shared))
}

#[cfg(target_os = "linux")]
fn publish_os_tid(slot: &AtomicI32) {
    // SAFETY: `gettid` takes no arguments and always succeeds.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as i32;
    slot.store(tid, Ordering::Release);
}

#[cfg(not(target_os = "linux"))]
fn publish_os_tid(slot: &AtomicI32) {
    slot.store(-1, Ordering::Release);
}

/// A worker's body: drain its own deque, then try to steal, then park on its
/// wakeup semaphore until new work arrives or `exit` is set.
fn worker_loop(
    local: WorkerQueue,
    shared: Arc<SharedQueue>,
    wakeup: Arc<Semaphore>,
    exit: Arc<AtomicBool>,
    spin_count: u32,
) {
    let mut steal_cursor = 0usize;
    loop {
        if let Some(item) = local.pop_own() {
            item();
            continue;
        }

        if let Some(item) = shared.steal_any(steal_cursor) {
            steal_cursor = steal_cursor.wrapping_add(1);
            item();
            continue;
        }

        if exit.load(Ordering::Acquire) {
            return;
        }

        wakeup.wait_spinning(spin_count);

        if exit.load(Ordering::Acquire) && local.pop_own().is_none() && shared.is_empty() {
            return;
        }
    }
}
