//! Error taxonomy surfaced to callers.
//!
//! Every failure reaches the specific caller whose call triggered it or was
//! affected by it; nothing is swallowed. Worker-reported errors keep their
//! name/message/stack intact inside the variant payload.

use std::time::Duration;

use crate::payload::ErrorPayload;

/// Well-known error class names used on the wire.
pub mod error_names {
    pub const TIMEOUT: &str = "TimeoutError";
    pub const QUEUE_OVERFLOW: &str = "QueueOverflowError";
    pub const ABORTED: &str = "AbortedError";
    pub const WORKER_TERMINATED: &str = "WorkerTerminatedError";
    pub const WORKER_CRASHED: &str = "WorkerCrashedError";
    pub const FUNCTION_NOT_FOUND: &str = "FunctionNotFoundError";
}

/// Why a dispatched call failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The pending-call queue was full at dispatch time; the call was never
    /// queued and never dispatched. Back off and retry later.
    #[error("Queue limit of {limit} reached")]
    QueueOverflow { limit: usize },

    /// No response within the per-call budget. The worker is presumed stuck
    /// and has been discarded.
    #[error("Worker call '{func}' timed out after {}ms", timeout.as_millis())]
    Timeout { func: String, timeout: Duration },

    /// The caller-supplied cancellation token fired first. The bound worker
    /// has been terminated, not reused.
    #[error("Worker call '{func}' has been aborted")]
    Aborted { func: String },

    /// The pool or dispatcher was torn down while this call was outstanding
    /// or queued, or the worker exited mid-call.
    #[error("Worker has been terminated")]
    WorkerTerminated,

    /// The worker crashed while this call was outstanding. The pool heals
    /// back to its floor asynchronously.
    #[error("Worker crashed: {}", .0.message)]
    WorkerCrashed(ErrorPayload),

    /// The worker-side dispatcher has no function registered under this
    /// name. The worker itself remains usable.
    #[error("{}", .0.message)]
    FunctionNotFound(ErrorPayload),

    /// An error raised inside the called function, propagated verbatim.
    #[error("{}", .0.message)]
    Application(ErrorPayload),

    /// A `Transfer` argument was combined with other positional arguments.
    /// Rejected synchronously, before any dispatch.
    #[error("Transfer must be the sole argument; wrap all values in one Transfer")]
    InvalidTransfer,

    /// Per-call options were invalid (e.g. a zero timeout).
    #[error(transparent)]
    InvalidOptions(#[from] ConfigError),
}

impl CallError {
    /// Map a worker-reported error payload onto the taxonomy.
    pub fn from_worker(payload: ErrorPayload) -> Self {
        match payload.name.as_str() {
            error_names::FUNCTION_NOT_FOUND => CallError::FunctionNotFound(payload),
            _ => CallError::Application(payload),
        }
    }
}

/// Invalid dispatcher or per-call configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A timeout of zero is a configuration error, not "no timeout"; use
    /// `Timeout::Never` to disable the timer branch.
    #[error("invalid timeout of {0:?}: use Timeout::Never or a positive duration")]
    InvalidTimeout(Duration),

    /// The pool ceiling must admit at least one worker.
    #[error("max_workers must be at least 1")]
    ZeroMaxWorkers,

    /// The ceiling must not undercut the floor.
    #[error("max_workers ({max}) must be >= min_workers ({min})")]
    WorkerBounds { min: usize, max: usize },
}

/// A worker backend failed to bring up a new worker.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to spawn worker: {message}")]
pub struct SpawnError {
    message: String,
}

impl SpawnError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
