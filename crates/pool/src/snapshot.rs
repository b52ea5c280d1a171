//! Read-only observability views.
//!
//! Snapshots are owned copies handed out for diagnostics; holding one gives
//! no way to enqueue, dequeue or resize anything.

use serde::{Deserialize, Serialize};

use threadmill_protocol::{CallId, WorkerId};

/// One worker's state at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub busy: bool,
}

/// Pool composition at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub min_workers: usize,
    pub max_workers: usize,
    pub workers: Vec<WorkerStatus>,
}

impl PoolSnapshot {
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| w.busy).count()
    }

    pub fn idle_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.busy).count()
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.iter().any(|w| w.id == id)
    }
}

/// A queued call as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedCall {
    pub id: CallId,
    pub func: String,
}

/// Pending-call queue contents at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub max_size: Option<usize>,
    pub calls: Vec<QueuedCall>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Combined dispatcher diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSnapshot {
    pub pool: PoolSnapshot,
    pub queue: QueueSnapshot,
}
