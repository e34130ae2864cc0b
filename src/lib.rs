//! A fixed-size worker-thread pool for short-lived data-parallel work:
//! parallel-for "spreads" over an index range, and fire-and-forget tasks.
//!
//! Intended as a low-latency substitute for platform parallel-for APIs
//! (OpenMP, Grand Central Dispatch's `dispatch_apply`) for workloads made of
//! many small bursts of parallel work, where the cost of waking, dispatching
//! and joining dominates useful work time. The pool is not a general-purpose
//! async executor: tasks are expected to be short, non-blocking, and
//! independent of each other.
//!
//! ```no_run
//! use burstwork::{Dispatcher, DispatcherConfig};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//! let mut squares = vec![0u64; 1_000];
//! dispatcher.spread(
//!     squares.len() as u32,
//!     |_start, _stop| { /* compute squares[start..stop] */ },
//!     64,
//! )?;
//! # Ok::<(), burstwork::DispatchError>(())
//! ```

mod barrier;
mod chunk;
mod config;
mod dispatcher;
mod error;
mod hardware;
mod hmp;
mod outcome;
mod queue;
mod semaphore;
mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, Priority};
pub use error::DispatchError;
pub use hmp::HmpClustersInfo;
#[cfg(feature = "hmp")]
pub use hmp::HmpConfig;
pub use outcome::Outcome;

pub mod hardware_concurrency {
    //! Standalone hardware-concurrency probe, usable without constructing a
    //! [`crate::Dispatcher`].
    pub use crate::hardware::concurrency_max;
}
