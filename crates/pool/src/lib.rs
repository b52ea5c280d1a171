//! # Elastic worker-pool call dispatch
//!
//! A [`Dispatcher`] hands named calls to a pool of isolated workers over
//! message channels and settles each call exactly once: with the worker's
//! result, the worker's error, a timeout, a caller abort, or a teardown
//! error.
//!
//! ## Architecture
//!
//! ```text
//! caller ──invoke──▶ ┌──────────────────────────────────────────────┐
//!                    │              Coordinator task                 │
//!                    │  ┌────────────┐   ┌───────────────────────┐  │
//!                    │  │ CallQueue  │   │      WorkerPool       │  │
//!                    │  │ (bounded   │   │ min..max records,     │  │
//!                    │  │  FIFO)     │   │ idle eviction timers, │  │
//!                    │  └────────────┘   │ crash self-healing    │  │
//!                    │                   └──────────┬────────────┘  │
//!                    │   in-flight map              │ channels      │
//!                    └──────────────────────────────┼───────────────┘
//!                                                   ▼
//!                                  [worker] [worker] ... [worker]
//! ```
//!
//! The coordinator task owns every piece of mutable state; callers, timers
//! and per-worker signal pumps communicate with it exclusively through
//! channels, so no locking is involved anywhere on the dispatch path.
//!
//! ## Example
//!
//! ```ignore
//! use threadmill_pool::{CallOptions, Dispatcher, DispatcherConfig};
//! use serde_json::json;
//!
//! let dispatcher = Dispatcher::spawn(spawner, DispatcherConfig::default()).await?;
//!
//! let add = dispatcher.function("add", CallOptions::default());
//! let sum = add.call(vec![json!(1), json!(2)]).await?;
//!
//! dispatcher.terminate().await;
//! ```

pub mod cancel;
pub mod config;
pub mod dedicated;
pub mod dispatcher;
pub mod pool;
pub mod queue;
pub mod snapshot;

pub use cancel::{CancelReason, ComposedCancel, Timeout};
pub use config::{CallOptions, DispatcherConfig};
pub use dedicated::{DedicatedStatus, DedicatedWorker};
pub use dispatcher::{CallFuture, CallResult, Dispatcher, DispatcherError, RemoteFunction};
pub use pool::WorkerPool;
pub use queue::{CallQueue, Overflow};
pub use snapshot::{DispatcherSnapshot, PoolSnapshot, QueueSnapshot, WorkerStatus};

/// Common imports.
pub mod prelude {
    pub use crate::cancel::Timeout;
    pub use crate::config::{CallOptions, DispatcherConfig};
    pub use crate::dispatcher::{Dispatcher, RemoteFunction};
    pub use crate::snapshot::DispatcherSnapshot;
    pub use threadmill_protocol::{CallArgs, CallError, Transfer};
}
