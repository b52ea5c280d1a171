//! A single pinned worker with a serial call queue.
//!
//! Unlike the elastic [`Dispatcher`](crate::dispatcher::Dispatcher), a
//! `DedicatedWorker` sends every call to the same worker, one at a time,
//! so worker-local state persists between calls. A crash rejects all
//! pending calls and leaves the handle terminated until [`respawn`] brings
//! up a fresh worker.
//!
//! [`respawn`]: DedicatedWorker::respawn

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use threadmill_protocol::{
    CallArgs, CallError, CallId, RequestPayload, SpawnError, WorkerId, WorkerRequest,
    WorkerSignal, WorkerSpawner,
};

use crate::dispatcher::{CallFuture, CallResult};
use crate::queue::CallQueue;

/// Diagnostics for one dedicated worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedicatedStatus {
    /// No live worker behind the handle (crashed or terminated).
    pub terminated: bool,
    /// A call is currently executing.
    pub busy: bool,
    /// Calls waiting behind the active one.
    pub queue_len: usize,
}

struct SerialCall {
    id: CallId,
    func: String,
    args: Vec<Value>,
    buffers: Vec<Vec<u8>>,
    reply: oneshot::Sender<CallResult>,
}

impl SerialCall {
    fn settle(self, result: CallResult) {
        let _ = self.reply.send(result);
    }
}

enum Command {
    Call(SerialCall),
    Respawn(oneshot::Sender<Result<(), SpawnError>>),
    Status(oneshot::Sender<DedicatedStatus>),
    Terminate(oneshot::Sender<()>),
}

/// Handle to one pinned worker processing calls serially.
#[derive(Clone)]
pub struct DedicatedWorker {
    commands: mpsc::UnboundedSender<Command>,
}

impl DedicatedWorker {
    /// Spawn the worker eagerly and start the serial coordinator.
    /// `max_queue_size` of `None` means unbounded.
    pub async fn spawn(
        spawner: impl WorkerSpawner,
        max_queue_size: Option<usize>,
    ) -> Result<Self, SpawnError> {
        let spawner: Arc<dyn WorkerSpawner> = Arc::new(spawner);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = Live::bring_up(&spawner, &event_tx).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let serial = Serial {
            spawner,
            worker: Some(worker),
            active: None,
            queue: CallQueue::new(max_queue_size),
            commands: command_rx,
            events: event_rx,
            event_tx,
        };
        tokio::spawn(serial.run());
        info!(max_queue_size = ?max_queue_size, "dedicated worker started");

        Ok(Self {
            commands: command_tx,
        })
    }

    /// Enqueue a call. Fails fast when the worker is terminated or the
    /// queue is at its bound. No timeout policy applies here.
    pub fn call(&self, func: impl Into<String>, args: impl Into<CallArgs>) -> CallFuture {
        let args = args.into();
        if let Err(err) = args.validate() {
            return CallFuture::settled(Err(err));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let (values, buffers) = args.into_wire();
        let call = SerialCall {
            id: CallId::generate(),
            func: func.into(),
            args: values,
            buffers,
            reply: reply_tx,
        };
        if let Err(mpsc::error::SendError(command)) = self.commands.send(Command::Call(call)) {
            if let Command::Call(call) = command {
                call.settle(Err(CallError::WorkerTerminated));
            }
        }
        CallFuture::from_receiver(reply_rx)
    }

    /// Bring up a fresh worker after a crash or exit. No-op when one is
    /// already live.
    pub async fn respawn(&self) -> Result<(), SpawnError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Respawn(tx))
            .map_err(|_| SpawnError::new("dedicated worker is shut down"))?;
        rx.await
            .map_err(|_| SpawnError::new("dedicated worker is shut down"))?
    }

    pub async fn status(&self) -> Result<DedicatedStatus, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| CallError::WorkerTerminated)?;
        rx.await.map_err(|_| CallError::WorkerTerminated)
    }

    /// Reject everything pending and stop the worker for good.
    pub async fn terminate(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Terminate(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// The live worker behind the handle.
struct Live {
    id: WorkerId,
    requests: mpsc::UnboundedSender<WorkerRequest>,
    shutdown: CancellationToken,
}

impl Live {
    async fn bring_up(
        spawner: &Arc<dyn WorkerSpawner>,
        events: &mpsc::UnboundedSender<(WorkerId, WorkerSignal)>,
    ) -> Result<Live, SpawnError> {
        let handle = spawner.spawn().await?;
        let id = handle.id;
        let events = events.clone();
        let mut signals = handle.signals;
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                if events.send((id, signal)).is_err() {
                    break;
                }
            }
        });
        Ok(Live {
            id,
            requests: handle.requests,
            shutdown: handle.shutdown,
        })
    }
}

struct Serial {
    spawner: Arc<dyn WorkerSpawner>,
    worker: Option<Live>,
    active: Option<SerialCall>,
    queue: CallQueue<SerialCall>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<(WorkerId, WorkerSignal)>,
    event_tx: mpsc::UnboundedSender<(WorkerId, WorkerSignal)>,
}

impl Serial {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None => {
                        self.teardown();
                        break;
                    }
                    Some(Command::Call(call)) => self.handle_call(call),
                    Some(Command::Respawn(reply)) => {
                        let _ = reply.send(self.handle_respawn().await);
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(DedicatedStatus {
                            terminated: self.worker.is_none(),
                            busy: self.active.is_some(),
                            queue_len: self.queue.len(),
                        });
                    }
                    Some(Command::Terminate(reply)) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                },
                Some((worker, signal)) = self.events.recv() => {
                    self.handle_signal(worker, signal);
                }
            }
        }
    }

    fn handle_call(&mut self, call: SerialCall) {
        if self.worker.is_none() {
            call.settle(Err(CallError::WorkerTerminated));
            return;
        }
        if self.active.is_some() {
            if let Err(overflow) = self.queue.enqueue(call) {
                let limit = overflow.limit;
                overflow.item.settle(Err(CallError::QueueOverflow { limit }));
            }
            return;
        }
        self.execute(call);
    }

    fn execute(&mut self, mut call: SerialCall) {
        let Some(worker) = &self.worker else {
            call.settle(Err(CallError::WorkerTerminated));
            return;
        };
        let request = WorkerRequest {
            payload: RequestPayload {
                func: call.func.clone(),
                args: call.args.clone(),
                id: call.id,
            },
            // Transfer buffers move with the message.
            buffers: std::mem::take(&mut call.buffers),
        };
        debug!(call = %call.id, func = %call.func, worker = %worker.id, "executing serial call");
        if worker.requests.send(request).is_err() {
            // Channel already closed; the crash signal follows shortly.
            call.settle(Err(CallError::WorkerTerminated));
            return;
        }
        self.active = Some(call);
    }

    fn handle_signal(&mut self, from: WorkerId, signal: WorkerSignal) {
        // Signals from a worker replaced by respawn() are stale.
        let current = self.worker.as_ref().map(|live| live.id);
        if current != Some(from) {
            debug!(worker = %from, "ignoring signal from replaced worker");
            return;
        }
        match signal {
            WorkerSignal::Message(response) => {
                let Some(call) = self.active.take() else {
                    return;
                };
                if call.id != response.id {
                    debug!(call = %call.id, "mismatched response id");
                    self.active = Some(call);
                    return;
                }
                call.settle(response.into_outcome().map_err(CallError::from_worker));
                if let Some(next) = self.queue.dequeue() {
                    self.execute(next);
                }
            }
            WorkerSignal::Crash(error) => {
                // Worker state is inconsistent after a crash; it must not
                // be reused, and every pending call fails with the crash.
                warn!(worker = %from, error = %error, "dedicated worker crashed");
                if let Some(live) = self.worker.take() {
                    live.shutdown.cancel();
                }
                if let Some(call) = self.active.take() {
                    call.settle(Err(CallError::WorkerCrashed(error.clone())));
                }
                for call in self.queue.drain() {
                    call.settle(Err(CallError::WorkerCrashed(error.clone())));
                }
            }
            WorkerSignal::Exit => {
                debug!(worker = %from, "dedicated worker exited");
                self.worker = None;
                if let Some(call) = self.active.take() {
                    call.settle(Err(CallError::WorkerTerminated));
                }
                for call in self.queue.drain() {
                    call.settle(Err(CallError::WorkerTerminated));
                }
            }
        }
    }

    async fn handle_respawn(&mut self) -> Result<(), SpawnError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let live = Live::bring_up(&self.spawner, &self.event_tx).await?;
        debug!(worker = %live.id, "dedicated worker respawned");
        self.worker = Some(live);
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(call) = self.active.take() {
            call.settle(Err(CallError::WorkerTerminated));
        }
        for call in self.queue.drain() {
            call.settle(Err(CallError::WorkerTerminated));
        }
        if let Some(live) = self.worker.take() {
            live.shutdown.cancel();
        }
    }
}
