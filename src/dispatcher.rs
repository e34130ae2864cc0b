//! The pool itself: owns the workers, the shared queue, the per-spread
//! completion barrier, and the tunables that steer how aggressively chunks
//! get split and stolen.
//!
//! Design note on "exact worker selection": the original library pushes a
//! chunk directly onto the target worker's own deque from the dispatching
//! thread. `crossbeam_deque::Worker<T>` is intentionally `!Sync` — only its
//! owning thread may push onto it — so that push cannot be reproduced from
//! outside the worker thread without re-adding a lock the original didn't
//! need. This dispatcher instead always enqueues through the shared
//! [`SharedQueue`] injector and uses `exact_worker_selection` to choose how
//! many *specific* workers get woken (one signal per targeted chunk, instead
//! of broadcasting to the whole pool): the latency win the original got from
//! bypassing the shared queue on the push side, this gets on the wake side.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::barrier::Barrier;
use crate::chunk::ChunkedSpread;
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::hardware::concurrency_max;
use crate::outcome::{pair, Outcome};
use crate::queue::{SharedQueue, WorkItem};
use crate::worker::{spawn_pool, WorkerHandle};

#[cfg(feature = "hmp")]
use crate::hmp::{HmpClustersInfo, HmpConfig};

/// Scheduling priority hint forwarded to `setpriority(2)` on unix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Linux/unix `nice` value: lower is higher priority.
    fn niceness(self) -> i32 {
        match self {
            Priority::Low => 10,
            Priority::Normal => 0,
            Priority::High => -10,
        }
    }
}

const MAX_STEALING_DIVISION: u32 = 16;
/// No subdivision until a spread actually stalls the caller's spin-wait; a
/// fresh pool should produce exactly `number_of_work_parts` chunks so the
/// common case stays cache-friendly.
const INITIAL_STEALING_DIVISION: u32 = 1;

/// A fixed-size worker pool executing parallel-for spreads and
/// fire-and-forget tasks.
pub struct Dispatcher {
    workers: Mutex<Vec<WorkerHandle>>,
    worker_thread_ids: Mutex<Vec<ThreadId>>,
    shared: Mutex<Arc<SharedQueue>>,
    exit: Arc<AtomicBool>,
    work_items: Arc<AtomicU32>,
    caller_steal_lock: Mutex<()>,
    stealing_division: AtomicU32,
    config: DispatcherConfig,
    #[cfg(feature = "hmp")]
    hmp: Mutex<Option<HmpConfig>>,
}

impl Dispatcher {
    /// Builds a pool sized to `config.max_hardware_concurrency` or, absent a
    /// cap, to the detected (container-quota-aware) hardware concurrency.
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        let detected = concurrency_max().get();
        let mut worker_count = config.max_hardware_concurrency.map_or(detected, |cap| cap.min(detected));

        #[cfg(feature = "hmp")]
        let initial_hmp = config.hmp.map(|info| {
            let normalized = HmpConfig::normalize(info, HmpClustersInfo::MAX_CLUSTERS as u8);
            worker_count = normalized.total_cores().saturating_sub(u16::from(config.use_caller_thread)).max(1);
            normalized
        });

        let exit = Arc::new(AtomicBool::new(false));
        let (workers, shared) = spawn_pool(worker_count, config.worker_spin_count, &exit)?;
        let worker_thread_ids = workers.iter().map(|w| w.thread_id).collect();

        debug!(worker_count, "dispatcher pool started");

        Ok(Dispatcher {
            workers: Mutex::new(workers),
            worker_thread_ids: Mutex::new(worker_thread_ids),
            shared: Mutex::new(shared),
            exit,
            work_items: Arc::new(AtomicU32::new(0)),
            caller_steal_lock: Mutex::new(()),
            stealing_division: AtomicU32::new(INITIAL_STEALING_DIVISION),
            config,
            #[cfg(feature = "hmp")]
            hmp: Mutex::new(initial_hmp),
        })
    }

    pub fn number_of_workers(&self) -> u16 {
        self.workers.lock().len() as u16
    }

    /// Approximate count of outstanding work units. May transiently
    /// over/undercount under concurrent `fire_and_forget` producers; treat
    /// as a scheduling hint, not an exact inventory.
    pub fn number_of_items(&self) -> u16 {
        self.work_items.load(Ordering::Relaxed).min(u32::from(u16::MAX)) as u16
    }

    fn running_on_a_worker(&self) -> bool {
        let current = std::thread::current().id();
        self.worker_thread_ids.lock().iter().any(|id| *id == current)
    }

    /// True once `work_items + incoming` would exceed `config.max_queue_depth`.
    /// Always `false` when no cap is configured.
    fn queue_depth_exceeded(&self, incoming: u32) -> bool {
        match self.config.max_queue_depth {
            Some(cap) => self.work_items.load(Ordering::Relaxed).saturating_add(incoming) > cap,
            None => false,
        }
    }

    /// Runs `work(start, end)` in parallel chunks over `[0, iterations)`,
    /// blocking until every chunk has completed.
    pub fn spread(
        &self,
        iterations: u32,
        work: impl Fn(u32, u32) + Send + Sync + 'static,
        parallelizable_iterations_count: u32,
    ) -> Result<(), DispatchError> {
        if iterations == 0 {
            return Ok(());
        }
        let parallelizable = parallelizable_iterations_count.max(1);

        let pre_existing = self.work_items.load(Ordering::Relaxed);
        let worker_count = self.number_of_workers();
        if worker_count == 0 || (pre_existing > 0 && self.running_on_a_worker()) {
            trace!(iterations, "running spread sequentially: zero workers or recursive call");
            work(0, iterations);
            return Ok(());
        }

        let free_workers = u32::from(worker_count).saturating_sub(pre_existing);
        let use_caller_thread = self.config.use_caller_thread && free_workers > 0;

        // HMP path (spec §4.5 step 4): only while the shop is otherwise idle,
        // since cluster-weighted chunking and adaptive work-stealing
        // subdivision are mutually exclusive policies for the same spread.
        #[cfg(feature = "hmp")]
        {
            let hmp_config = if pre_existing == 0 { *self.hmp.lock() } else { None };
            if let Some(hmp) = hmp_config {
                trace!(iterations, "running spread over hmp clusters");
                let ranges = hmp_chunk_plan(&hmp, iterations, parallelizable, use_caller_thread);
                return self.run_plan(iterations, ranges, work, use_caller_thread, false);
            }
        }

        let max_work_parts = if free_workers > 0 { free_workers } else { u32::from(worker_count) };
        let mut number_of_work_parts = (iterations / parallelizable).max(1).min(max_work_parts);
        if use_caller_thread && number_of_work_parts > 1 {
            number_of_work_parts -= 1;
        }

        let subdivide = pre_existing == 0;
        let slice_div =
            if subdivide { self.stealing_division.load(Ordering::Relaxed).min(number_of_work_parts.max(1)) } else { 1 };
        let dispatched_parts = (number_of_work_parts * slice_div).max(1);
        let total_slots = dispatched_parts + u32::from(use_caller_thread);

        let spread = ChunkedSpread::new(iterations, total_slots);
        let total_parts = ChunkedSpread::chunk_count(iterations, total_slots);
        let ranges: Vec<(u32, u32)> = (0..total_parts).map(|part| spread.chunk_range(part)).collect();

        self.run_plan(iterations, ranges, work, use_caller_thread, true)
    }

    /// Enqueues every range but the last (when `use_caller_thread`), runs the
    /// caller's own range directly, then steals and waits for the rest.
    /// `ranges` must already partition `[0, iterations)`, with the caller's
    /// intended chunk (if any) placed last.
    ///
    /// If `config.max_queue_depth` would be exceeded by the chunks this call
    /// would enqueue, nothing is enqueued at all: the barrier is left at
    /// zero, every iteration runs sequentially on the caller thread, and
    /// `Err(DispatchError::QueueFull)` is returned.
    fn run_plan(
        &self,
        iterations: u32,
        ranges: Vec<(u32, u32)>,
        work: impl Fn(u32, u32) + Send + Sync + 'static,
        use_caller_thread: bool,
        adjust_subdivision: bool,
    ) -> Result<(), DispatchError> {
        let total_parts = ranges.len() as u32;
        let caller_part = if use_caller_thread && total_parts > 0 { Some(total_parts - 1) } else { None };
        let enqueued_parts = total_parts - u32::from(caller_part.is_some());

        if self.queue_depth_exceeded(enqueued_parts) {
            warn!(iterations, enqueued_parts, "queue depth cap exceeded, running spread on the caller thread");
            work(0, iterations);
            return Err(DispatchError::QueueFull);
        }

        let template: Arc<dyn Fn(u32, u32) + Send + Sync> = Arc::new(work);
        let barrier = Arc::new(Barrier::new(0));
        barrier.use_spin_wait(self.config.spin_before_suspension);

        barrier.initialize(enqueued_parts);
        self.work_items.fetch_add(enqueued_parts, Ordering::AcqRel);

        let shared = Arc::clone(&self.shared.lock());
        let mut signalled = 0u32;
        for (part, &(start, stop)) in ranges.iter().enumerate() {
            if caller_part == Some(part as u32) {
                continue;
            }
            let chunk_template = Arc::clone(&template);
            let chunk_barrier = Arc::clone(&barrier);
            let work_items = Arc::clone(&self.work_items);
            let item: WorkItem = Box::new(move || {
                chunk_template(start, stop);
                chunk_barrier.arrive();
                work_items.fetch_sub(1, Ordering::AcqRel);
            });
            shared.push(item);
            signalled += 1;
        }

        if signalled > 0 {
            let workers = self.workers.lock();
            let wake_count = if self.config.exact_worker_selection { signalled as usize } else { workers.len() };
            for worker in workers.iter().take(wake_count) {
                worker.wakeup.signal(1);
            }
        }

        if let Some(part) = caller_part {
            let (start, stop) = ranges[part as usize];
            template(start, stop);
        }

        self.caller_steal_work_until_done(&shared, &barrier);

        let stalled = if self.config.spin_before_suspension {
            barrier.spin_wait(self.config.caller_spin_count).0
        } else {
            barrier.wait();
            false
        };

        if stalled {
            warn!(iterations, "spread stalled, increasing work subdivision");
            if adjust_subdivision {
                let _ = self.stealing_division.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                    Some((d + 1).min(MAX_STEALING_DIVISION))
                });
            }
        }

        Ok(())
    }

    /// While the barrier has not closed, try to steal and run one more chunk
    /// so a fast caller stays useful instead of idling. The lock only
    /// serializes concurrent callers against each other; `Injector::steal`
    /// needs no cursor of its own.
    fn caller_steal_work_until_done(&self, shared: &SharedQueue, barrier: &Barrier) {
        let _guard = self.caller_steal_lock.lock();
        while barrier.actives() > 0 {
            match shared.steal_from_injector() {
                Some(item) => item(),
                None => break,
            }
        }
    }

    /// Enqueues `work` to run once on some worker; does not block.
    pub fn fire_and_forget(&self, work: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        if self.queue_depth_exceeded(1) {
            warn!("queue depth cap exceeded, rejecting fire_and_forget");
            return Err(DispatchError::QueueFull);
        }
        self.work_items.fetch_add(1, Ordering::AcqRel);
        let work_items = Arc::clone(&self.work_items);
        let item: WorkItem = Box::new(move || {
            work();
            work_items.fetch_sub(1, Ordering::AcqRel);
        });
        self.shared.lock().push(item);
        let workers = self.workers.lock();
        if let Some(worker) = workers.first() {
            worker.wakeup.signal(1);
        }
        Ok(())
    }

    /// Enqueues `work` to run once on some worker, returning a handle that
    /// blocks for the result (or a worker-panic error) on `join`.
    pub fn dispatch<R: Send + 'static>(&self, work: impl FnOnce() -> R + Send + 'static) -> Outcome<R> {
        let (sender, outcome) = pair::<R>();
        let work = AssertUnwindSafe(work);
        let _ = self.fire_and_forget(move || {
            sender.complete_with(work);
        });
        outcome
    }

    /// Sets the scheduling priority of every worker thread. Best-effort: on
    /// non-unix platforms this always returns `false`.
    #[cfg(unix)]
    pub fn set_priority(&self, level: Priority) -> bool {
        let workers = self.workers.lock();
        let mut all_ok = !workers.is_empty();
        for worker in workers.iter() {
            let tid = worker.os_tid.load(Ordering::Acquire);
            if tid <= 0 {
                all_ok = false;
                continue;
            }
            // SAFETY: `tid` was published by the worker via `gettid` and the
            // thread is alive for the lifetime of this `Dispatcher`.
            let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, level.niceness()) };
            all_ok &= rc == 0;
        }
        all_ok
    }

    #[cfg(not(unix))]
    pub fn set_priority(&self, _level: Priority) -> bool {
        false
    }

    /// Pins `worker_index` to `cpu_id` by routing a one-shot affinity job to
    /// that worker (affinity can only be set by the thread itself).
    pub fn bind_worker_to_cpu(&self, worker_index: u16, cpu_id: usize) -> bool {
        let Some(core_ids) = core_affinity::get_core_ids() else {
            return false;
        };
        let Some(core_id) = core_ids.into_iter().find(|c| c.id == cpu_id) else {
            return false;
        };
        if worker_index >= self.number_of_workers() {
            return false;
        }
        self.fire_and_forget(move || {
            core_affinity::set_for_current(core_id);
        })
        .is_ok()
    }

    /// Resizes the pool. Fails with `Busy` if there is outstanding work.
    pub fn set_max_allowed_threads(&self, n: u16) -> Result<(), DispatchError> {
        if self.work_items.load(Ordering::Acquire) != 0 {
            return Err(DispatchError::Busy);
        }
        #[cfg(feature = "hmp")]
        if self.hmp.lock().is_some() {
            return Err(DispatchError::Busy);
        }
        self.resize_workers(n)
    }

    fn resize_workers(&self, n: u16) -> Result<(), DispatchError> {
        self.exit.store(true, Ordering::Release);
        {
            let mut workers = self.workers.lock();
            for worker in workers.iter() {
                worker.wakeup.signal(1);
            }
            for worker in workers.iter_mut() {
                worker.join();
            }
        }
        self.exit.store(false, Ordering::Release);

        let (new_workers, new_shared) = spawn_pool(n, self.config.worker_spin_count, &self.exit)?;
        *self.worker_thread_ids.lock() = new_workers.iter().map(|w| w.thread_id).collect();
        *self.workers.lock() = new_workers;
        *self.shared.lock() = new_shared;
        debug!(worker_count = n, "dispatcher pool resized");
        Ok(())
    }

    /// Enables HMP-aware scheduling. Requires the `hmp` feature and no
    /// pending work.
    #[cfg(feature = "hmp")]
    pub fn configure_hmp(&self, info: HmpClustersInfo, clusters: u8) -> Result<(), DispatchError> {
        if self.work_items.load(Ordering::Acquire) != 0 {
            return Err(DispatchError::Busy);
        }
        let config = HmpConfig::normalize(info, clusters);
        let total = config.total_cores();
        let caller_slot = u16::from(self.config.use_caller_thread);
        *self.hmp.lock() = Some(config);
        self.resize_workers(total.saturating_sub(caller_slot))
    }
}

/// Builds the chunk ranges for one HMP-aware spread: `hmp.partition` splits
/// `iterations` across clusters by normalized power, then each cluster's
/// share is divided evenly across its own cores via the same chunked-spread
/// planner the non-HMP path uses. When `use_caller_thread`, cluster 0's last
/// chunk is pulled out and appended last so [`Dispatcher::run_plan`] hands it
/// to the caller instead of enqueueing it.
#[cfg(feature = "hmp")]
fn hmp_chunk_plan(hmp: &HmpConfig, iterations: u32, parallelizable: u32, use_caller_thread: bool) -> Vec<(u32, u32)> {
    let distribution = hmp.partition(iterations, parallelizable);
    let mut ranges = Vec::new();
    let mut caller_range = None;
    let mut offset = 0u32;

    for (cluster, cluster_iterations) in distribution.clusters() {
        if cluster_iterations == 0 {
            continue;
        }
        let cores = u32::from(hmp.cores[cluster]).max(1);
        let spread = ChunkedSpread::new(cluster_iterations, cores);
        let parts = ChunkedSpread::chunk_count(cluster_iterations, cores);

        for part in 0..parts {
            let (start, stop) = spread.chunk_range(part);
            let range = (offset + start, offset + stop);
            if use_caller_thread && cluster == 0 && caller_range.is_none() && part == parts - 1 {
                caller_range = Some(range);
            } else {
                ranges.push(range);
            }
        }
        offset += cluster_iterations;
    }

    ranges.extend(caller_range);
    ranges
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Release);
        let mut workers = self.workers.lock();
        for worker in workers.iter() {
            worker.wakeup.signal(1);
        }
        for worker in workers.iter_mut() {
            worker.join();
        }
        debug!("dispatcher pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn test_dispatcher(workers: u16) -> Dispatcher {
        Dispatcher::new(DispatcherConfig::new().max_hardware_concurrency(workers)).expect("pool should start")
    }

    #[test]
    fn zero_iterations_never_calls_work() {
        let dispatcher = test_dispatcher(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        dispatcher
            .spread(
                0,
                move |_, _| {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                1,
            )
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_iteration_runs_exactly_once() {
        let dispatcher = test_dispatcher(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        dispatcher
            .spread(
                1,
                move |start, stop| {
                    assert_eq!((start, stop), (0, 1));
                    c.fetch_add(1, Ordering::SeqCst);
                },
                1,
            )
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn totality_holds_for_a_mid_sized_spread() {
        let dispatcher = test_dispatcher(4);
        let seen: Arc<StdMutex<Vec<(u32, u32)>>> = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        dispatcher
            .spread(
                100,
                move |start, stop| {
                    s.lock().unwrap().push((start, stop));
                },
                1,
            )
            .unwrap();

        let mut ranges = seen.lock().unwrap().clone();
        ranges.sort_unstable();
        let mut cursor = 0u32;
        for (start, stop) in ranges {
            assert_eq!(start, cursor);
            assert!(stop > start);
            cursor = stop;
        }
        assert_eq!(cursor, 100);
    }

    #[test]
    fn fire_and_forget_completes() {
        let dispatcher = test_dispatcher(2);
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        dispatcher.fire_and_forget(move || d.store(true, Ordering::SeqCst)).unwrap();

        for _ in 0..200 {
            if done.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn dispatch_returns_the_value() {
        let dispatcher = test_dispatcher(2);
        let outcome = dispatcher.dispatch(|| 21 * 2);
        assert_eq!(outcome.join().unwrap(), 42);
    }

    #[test]
    fn dispatch_surfaces_panics() {
        let dispatcher = test_dispatcher(2);
        let outcome = dispatcher.dispatch(|| -> u32 { panic!("boom") });
        assert!(matches!(outcome.join(), Err(DispatchError::WorkerPanicked)));
    }

    #[test]
    fn spread_over_a_full_queue_falls_back_to_the_caller_thread() {
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new().max_hardware_concurrency(4).max_queue_depth(0),
        )
        .expect("pool should start");

        let iterations_done = Arc::new(AtomicUsize::new(0));
        let i = Arc::clone(&iterations_done);
        let result = dispatcher.spread(
            100,
            move |start, stop| {
                i.fetch_add((stop - start) as usize, Ordering::SeqCst);
            },
            1,
        );

        assert!(matches!(result, Err(DispatchError::QueueFull)));
        assert_eq!(iterations_done.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn fire_and_forget_over_a_full_queue_is_rejected() {
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new().max_hardware_concurrency(2).max_queue_depth(0),
        )
        .expect("pool should start");

        let result = dispatcher.fire_and_forget(|| {});
        assert!(matches!(result, Err(DispatchError::QueueFull)));
    }

    #[test]
    fn dispatch_over_a_full_queue_surfaces_queue_full() {
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new().max_hardware_concurrency(2).max_queue_depth(0),
        )
        .expect("pool should start");

        let outcome = dispatcher.dispatch(|| 1);
        assert!(matches!(outcome.join(), Err(DispatchError::QueueFull)));
    }

    #[test]
    fn fire_and_forget_can_recursively_spread_without_deadlock() {
        let dispatcher = Arc::new(test_dispatcher(4));
        let d = Arc::clone(&dispatcher);
        // Recursive spreads fall back to one sequential call covering the
        // whole range, since the worker running this job can't also wait
        // on chunks only it could execute.
        let iterations_done = Arc::new(AtomicUsize::new(0));
        let i = Arc::clone(&iterations_done);

        let outcome = dispatcher.dispatch(move || {
            d.spread(
                50,
                move |start, stop| {
                    i.fetch_add((stop - start) as usize, Ordering::SeqCst);
                },
                1,
            )
            .unwrap();
        });
        outcome.join().unwrap();
        assert_eq!(iterations_done.load(Ordering::SeqCst), 50);
    }
}
