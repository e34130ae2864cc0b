//! Dispatcher construction knobs.
//!
//! The original C++ library (Boost.Sweater) selected most of these at
//! compile time via preprocessor flags (`BOOST_SWEATER_USE_CALLER_THREAD`,
//! `BOOST_SWEATER_EXACT_WORKER_SELECTION`, spin counts, ...). Rust has no
//! equivalent of conditionally compiling a library's public behavior from a
//! downstream crate's perspective, so every one of those flags becomes a
//! runtime field on a builder, following the same builder-with-sane-defaults
//! shape the rest of the pack uses for tunables.

use crate::hmp::HmpClustersInfo;

/// Default number of spin iterations before a worker parks, matching the
/// original library's `spin_count` default.
pub(crate) const DEFAULT_WORKER_SPIN_COUNT: u32 = 100_000;

/// Default number of spin iterations the caller thread spends on
/// `spread_the_sweat`'s completion barrier before parking.
pub(crate) const DEFAULT_CALLER_SPIN_COUNT: u32 = 100_000;

/// Construction-time configuration for a [`crate::Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub(crate) max_hardware_concurrency: Option<u16>,
    pub(crate) use_caller_thread: bool,
    pub(crate) exact_worker_selection: bool,
    pub(crate) spin_before_suspension: bool,
    pub(crate) worker_spin_count: u32,
    pub(crate) caller_spin_count: u32,
    pub(crate) hmp: Option<HmpClustersInfo>,
    pub(crate) max_queue_depth: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            max_hardware_concurrency: None,
            use_caller_thread: true,
            exact_worker_selection: true,
            spin_before_suspension: true,
            worker_spin_count: DEFAULT_WORKER_SPIN_COUNT,
            caller_spin_count: DEFAULT_CALLER_SPIN_COUNT,
            hmp: None,
            max_queue_depth: None,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the worker pool size regardless of detected hardware concurrency.
    pub fn max_hardware_concurrency(mut self, max: u16) -> Self {
        self.max_hardware_concurrency = Some(max);
        self
    }

    /// Whether the calling thread participates in a `spread_the_sweat` call
    /// as an extra worker instead of only waiting. Default `true`.
    pub fn use_caller_thread(mut self, value: bool) -> Self {
        self.use_caller_thread = value;
        self
    }

    /// Whether a spread targets worker sub-queues directly (`true`) or goes
    /// through the shared injector queue (`false`). Exact selection gives
    /// better cache locality for the common single-spread-at-a-time case;
    /// disabling it is useful when spreads are issued concurrently from
    /// multiple caller threads. Default `true`.
    pub fn exact_worker_selection(mut self, value: bool) -> Self {
        self.exact_worker_selection = value;
        self
    }

    /// Whether workers/callers spin before blocking on new work or barrier
    /// completion. Default `true`.
    pub fn spin_before_suspension(mut self, value: bool) -> Self {
        self.spin_before_suspension = value;
        self
    }

    pub fn worker_spin_count(mut self, count: u32) -> Self {
        self.worker_spin_count = count;
        self
    }

    pub fn caller_spin_count(mut self, count: u32) -> Self {
        self.caller_spin_count = count;
        self
    }

    /// Enables HMP-aware scheduling using the given cluster description.
    /// Requires the `hmp` crate feature.
    #[cfg(feature = "hmp")]
    pub fn hmp(mut self, clusters: HmpClustersInfo) -> Self {
        self.hmp = Some(clusters);
        self
    }

    /// Soft cap on outstanding work units. A `spread`/`fire_and_forget`/
    /// `dispatch` call that would push the queue past `depth` instead runs
    /// its work on the caller thread and returns
    /// [`crate::DispatchError::QueueFull`]. Unset (default) means uncapped;
    /// mainly useful for deliberately exercising backpressure recovery in
    /// tests.
    pub fn max_queue_depth(mut self, depth: u32) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }
}
