//! Worker transport contract.
//!
//! A worker backend exposes one isolated execution unit as a pair of
//! channels plus a shutdown token: requests flow in, [`WorkerSignal`]s flow
//! out, and cancelling the token is the terminate signal. The coordinator
//! never sends a request while another call is outstanding on the same
//! worker.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SpawnError;
use crate::payload::{ErrorPayload, RequestPayload, ResponsePayload};

/// Identity of one live worker within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A request message plus any buffers moved along with it.
#[derive(Debug)]
pub struct WorkerRequest {
    pub payload: RequestPayload,
    /// Buffers transferred by move; empty for ordinary calls.
    pub buffers: Vec<Vec<u8>>,
}

/// Everything a worker can tell the coordinator.
#[derive(Debug)]
pub enum WorkerSignal {
    /// A reply to an outstanding request.
    Message(ResponsePayload),
    /// The worker died abnormally (panicked handler, broken backend).
    Crash(ErrorPayload),
    /// The worker stopped cleanly and will send nothing further.
    Exit,
}

/// Coordinator-side handle to one spawned worker.
///
/// `signals` is taken by the pool when the worker joins it; `shutdown` is
/// the terminate signal the backend's serve loop must honor.
pub struct WorkerHandle {
    pub id: WorkerId,
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub signals: mpsc::UnboundedReceiver<WorkerSignal>,
    pub shutdown: CancellationToken,
}

/// Worker-side end of the channel pair, consumed by backend serve loops.
pub struct WorkerEndpoint {
    pub requests: mpsc::UnboundedReceiver<WorkerRequest>,
    pub signals: mpsc::UnboundedSender<WorkerSignal>,
    pub shutdown: CancellationToken,
}

impl WorkerHandle {
    /// Build a connected handle/endpoint pair for a fresh worker.
    pub fn pipe() -> (WorkerHandle, WorkerEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let handle = WorkerHandle {
            id: WorkerId::generate(),
            requests: request_tx,
            signals: signal_rx,
            shutdown: shutdown.clone(),
        };
        let endpoint = WorkerEndpoint {
            requests: request_rx,
            signals: signal_tx,
            shutdown,
        };
        (handle, endpoint)
    }
}

/// The worker-spawning primitive a pool is built over.
#[async_trait]
pub trait WorkerSpawner: Send + Sync + 'static {
    /// Bring up one new worker. Best-effort: a failure here is reported to
    /// the pool, which retries on its next healing opportunity.
    async fn spawn(&self) -> Result<WorkerHandle, SpawnError>;
}
