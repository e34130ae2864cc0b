//! Error types for dispatch and pool construction.

use thiserror::Error;

/// Failure modes exposed to callers of [`crate::Dispatcher`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("work queue is full")]
    QueueFull,

    #[error("failed to spawn worker thread")]
    SpawnFailed(#[from] std::io::Error),

    #[error("dispatcher is shutting down")]
    Busy,

    #[error("a worker thread panicked while running dispatched work")]
    WorkerPanicked,
}
