//! Named function table exposed by a worker.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use threadmill_protocol::ErrorPayload;

/// Everything a handler receives for one call: positional JSON arguments
/// plus any buffers transferred by move.
#[derive(Debug, Default)]
pub struct Invocation {
    pub args: Vec<Value>,
    pub buffers: Vec<Vec<u8>>,
}

/// What a handler resolves to. Errors cross the wire verbatim as
/// `{name, message, stack}`; `anyhow::Error` converts via `?`.
pub type FunctionResult = Result<Value, ErrorPayload>;

type Handler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, FunctionResult> + Send + Sync>;

/// The functions a worker answers for, keyed by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    funcs: HashMap<String, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler under `name`. A later registration under
    /// the same name replaces the earlier one.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FunctionResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |invocation| Box::pin(handler(invocation)));
        self.funcs.insert(name.into(), handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_function<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = FunctionResult> + Send + 'static,
    {
        self.register(name, handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Handler> {
        self.funcs.get(name).cloned()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.funcs.keys().collect::<Vec<_>>())
            .finish()
    }
}
