//! Wire records and transport contract for coordinator <-> worker calls.
//!
//! A call travels as a [`RequestPayload`] (function name, arguments,
//! correlation id) and comes back as a [`ResponsePayload`] carrying exactly
//! one of a result or an [`ErrorPayload`]. The coordinator never shares
//! memory with a worker; everything crosses as discrete messages through the
//! channel pair described by [`WorkerHandle`].
//!
//! Worker backends (in-process tasks, threads, subprocesses) are plugged in
//! through the [`WorkerSpawner`] trait. The crate also defines the full
//! [`CallError`] taxonomy surfaced to callers and the [`Transfer`] wrapper
//! for move-semantics payloads.

mod error;
mod payload;
mod transfer;
mod transport;

pub use error::{error_names, CallError, ConfigError, SpawnError};
pub use payload::{CallId, ErrorPayload, RequestPayload, ResponsePayload};
pub use transfer::{Arg, CallArgs, Transfer};
pub use transport::{
    WorkerEndpoint, WorkerHandle, WorkerId, WorkerRequest, WorkerSignal, WorkerSpawner,
};
