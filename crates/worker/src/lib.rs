//! Worker-side runtime: the half of the system that lives inside each
//! isolated execution unit.
//!
//! A [`FunctionRegistry`] maps names to async handlers. The serve loop in
//! [`host`] implements the worker-side dispatcher contract: it looks up the
//! requested function, invokes it, and replies with `{id, result}` or
//! `{id, error}`. An unknown name is an error reply (the worker stays
//! usable); a panicking handler is a crash (the worker dies and signals it).
//!
//! [`InProcessSpawner`] runs the serve loop as a tokio task behind the
//! `WorkerSpawner` contract, which makes it both the reference backend and
//! the test vehicle for the pool.
//!
//! ## Example
//!
//! ```ignore
//! use threadmill_worker::{FunctionRegistry, InProcessSpawner};
//! use serde_json::json;
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register("add", |inv| async move {
//!     let a = inv.args[0].as_i64().unwrap_or(0);
//!     let b = inv.args[1].as_i64().unwrap_or(0);
//!     Ok(json!(a + b))
//! });
//!
//! let spawner = InProcessSpawner::new(registry);
//! let dispatcher = Dispatcher::spawn(spawner, DispatcherConfig::default()).await?;
//! ```

pub mod host;
pub mod registry;
pub mod spawner;

pub use registry::{FunctionRegistry, FunctionResult, Invocation};
pub use spawner::InProcessSpawner;
