//! In-process worker backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use threadmill_protocol::{SpawnError, WorkerHandle, WorkerSpawner};

use crate::host;
use crate::registry::FunctionRegistry;

/// Spawns workers as tokio tasks running the [`host::serve`] loop over a
/// shared function registry.
///
/// Tasks are isolated the same way remote workers are: the coordinator
/// talks to them only through the channel pair, never through shared
/// mutable state.
#[derive(Clone)]
pub struct InProcessSpawner {
    registry: Arc<FunctionRegistry>,
}

impl InProcessSpawner {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

#[async_trait]
impl WorkerSpawner for InProcessSpawner {
    async fn spawn(&self) -> Result<WorkerHandle, SpawnError> {
        let (handle, endpoint) = WorkerHandle::pipe();
        debug!(worker = %handle.id, "spawning in-process worker");
        tokio::spawn(host::serve(Arc::clone(&self.registry), endpoint));
        Ok(handle)
    }
}
