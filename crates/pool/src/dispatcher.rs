//! Call dispatcher: the public-facing unit of the system.
//!
//! One dispatcher per pool. `invoke` returns a future immediately; the
//! coordinator task behind it either dispatches the call to an idle or
//! freshly spawned worker or queues it, correlates the worker's reply by
//! call id, applies the composed timeout/abort policy, and settles the
//! future exactly once. Queued calls go out in strict FIFO order as workers
//! free up.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, instrument, warn};

use serde_json::Value;
use threadmill_protocol::{
    CallArgs, CallError, CallId, RequestPayload, SpawnError, WorkerId, WorkerRequest,
    WorkerSignal, WorkerSpawner,
};

use crate::cancel::{compose, CancelReason};
use crate::config::{CallOptions, DispatcherConfig};
use crate::pool::{PoolEvent, WorkerPool};
use crate::queue::CallQueue;
use crate::snapshot::{DispatcherSnapshot, QueueSnapshot, QueuedCall};

/// How a settled call resolves.
pub type CallResult = Result<Value, CallError>;

/// Failure to bring a dispatcher up.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Config(#[from] threadmill_protocol::ConfigError),

    /// Eagerly spawning the worker floor failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// A call waiting for a worker.
struct PendingCall {
    id: CallId,
    func: String,
    args: Vec<Value>,
    buffers: Vec<Vec<u8>>,
    options: CallOptions,
    reply: oneshot::Sender<CallResult>,
}

impl PendingCall {
    fn settle(self, result: CallResult) {
        // The caller may have dropped its future; that is not an error.
        let _ = self.reply.send(result);
    }
}

/// A dispatched call bound to one worker.
struct InFlight {
    call: CallId,
    func: String,
    timeout: Option<Duration>,
    reply: oneshot::Sender<CallResult>,
    /// Watcher for the composed cancellation signal; dropping this guard on
    /// settlement disposes the timer and listener.
    _cancel: Option<AbortOnDropHandle<()>>,
}

impl InFlight {
    fn settle(self, result: CallResult) {
        let _ = self.reply.send(result);
    }
}

enum Command {
    Invoke(PendingCall),
    Snapshot(oneshot::Sender<DispatcherSnapshot>),
    Terminate(oneshot::Sender<()>),
}

/// A composed cancellation signal fired for a dispatched call. Delivered on
/// a coordinator-internal channel so the public command channel closes when
/// the last [`Dispatcher`] handle drops.
struct CancelFired {
    worker: WorkerId,
    call: CallId,
    reason: CancelReason,
}

/// Future resolving to one call's outcome.
///
/// Settled exactly once by the coordinator; if the dispatcher disappears
/// underneath it, it resolves to a termination error.
pub struct CallFuture {
    reply: oneshot::Receiver<CallResult>,
}

impl Future for CallFuture {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply).poll(cx).map(|settled| match settled {
            Ok(result) => result,
            Err(_) => Err(CallError::WorkerTerminated),
        })
    }
}

impl CallFuture {
    /// A future already settled with `result`, bypassing the coordinator.
    /// Used for usage errors rejected before any dispatch.
    pub(crate) fn settled(result: CallResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { reply: rx }
    }

    pub(crate) fn from_receiver(reply: oneshot::Receiver<CallResult>) -> Self {
        Self { reply }
    }
}

/// Handle to a pool-backed call dispatcher.
///
/// Cheap to clone; all clones drive the same coordinator task. Dropping the
/// last clone tears the dispatcher down as if [`Dispatcher::terminate`] had
/// been called.
#[derive(Clone)]
pub struct Dispatcher {
    commands: mpsc::UnboundedSender<Command>,
}

impl Dispatcher {
    /// Validate `config`, eagerly spawn the worker floor and start the
    /// coordinator task.
    pub async fn spawn(
        spawner: impl WorkerSpawner,
        config: DispatcherConfig,
    ) -> Result<Self, DispatcherError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(Arc::new(spawner), &config, event_tx).await?;

        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            max_queue_size = ?config.max_queue_size,
            "dispatcher started"
        );

        let coordinator = Coordinator {
            pool,
            queue: CallQueue::new(config.max_queue_size),
            in_flight: HashMap::new(),
            commands: command_rx,
            cancels: cancel_rx,
            cancel_tx,
            events: event_rx,
        };
        tokio::spawn(coordinator.run());

        Ok(Self {
            commands: command_tx,
        })
    }

    /// Curry a named remote function with fixed options.
    ///
    /// ```ignore
    /// let add = dispatcher.function("add", CallOptions::default());
    /// let sum = add.call(vec![json!(1), json!(2)]).await?;
    /// ```
    pub fn function(&self, func: impl Into<String>, options: CallOptions) -> RemoteFunction {
        RemoteFunction {
            dispatcher: self.clone(),
            func: func.into(),
            options,
        }
    }

    /// Dispatch one call. The returned future settles exactly once.
    ///
    /// Usage errors (zero timeout, transfer mixed with positional
    /// arguments) settle the future immediately, before any dispatch.
    pub fn invoke(
        &self,
        func: impl Into<String>,
        args: impl Into<CallArgs>,
        options: CallOptions,
    ) -> CallFuture {
        let func = func.into();
        let args = args.into();

        if let Err(err) = args.validate() {
            return CallFuture::settled(Err(err));
        }
        if let Err(err) = options.timeout.validate() {
            return CallFuture::settled(Err(CallError::InvalidOptions(err)));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let (values, buffers) = args.into_wire();
        let call = PendingCall {
            id: CallId::generate(),
            func,
            args: values,
            buffers,
            options,
            reply: reply_tx,
        };

        if let Err(mpsc::error::SendError(command)) = self.commands.send(Command::Invoke(call)) {
            // Coordinator is gone: terminal teardown, fail fast.
            if let Command::Invoke(call) = command {
                call.settle(Err(CallError::WorkerTerminated));
            }
        }
        CallFuture { reply: reply_rx }
    }

    /// Read-only view of the current pool composition and queue contents.
    pub async fn snapshot(&self) -> Result<DispatcherSnapshot, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .map_err(|_| CallError::WorkerTerminated)?;
        rx.await.map_err(|_| CallError::WorkerTerminated)
    }

    /// Tear the dispatcher down: every outstanding and queued call is
    /// rejected with a termination error, all workers are terminated, and
    /// later invokes fail fast. Terminal and idempotent.
    pub async fn terminate(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Terminate(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// A named worker function curried with fixed call options.
pub struct RemoteFunction {
    dispatcher: Dispatcher,
    func: String,
    options: CallOptions,
}

impl RemoteFunction {
    pub fn call(&self, args: impl Into<CallArgs>) -> CallFuture {
        self.dispatcher
            .invoke(self.func.clone(), args, self.options.clone())
    }

    pub fn name(&self) -> &str {
        &self.func
    }
}

/// The single task owning pool, queue and in-flight state. All mutation
/// happens here, in event order, so none of it needs locks.
struct Coordinator {
    pool: WorkerPool,
    queue: CallQueue<PendingCall>,
    in_flight: HashMap<WorkerId, InFlight>,
    /// Public command channel; `None` means the last handle dropped.
    commands: mpsc::UnboundedReceiver<Command>,
    cancels: mpsc::UnboundedReceiver<CancelFired>,
    cancel_tx: mpsc::UnboundedSender<CancelFired>,
    events: mpsc::UnboundedReceiver<PoolEvent>,
}

impl Coordinator {
    #[instrument(skip(self), name = "dispatcher")]
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None => {
                        // Last handle dropped: implicit teardown.
                        self.teardown();
                        break;
                    }
                    Some(Command::Invoke(call)) => self.handle_invoke(call).await,
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Terminate(reply)) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                },
                Some(fired) = self.cancels.recv() => {
                    self.handle_cancel(fired.worker, fired.call, fired.reason).await;
                }
                Some(event) = self.events.recv() => match event {
                    PoolEvent::Signal { worker, signal } => {
                        self.handle_signal(worker, signal).await;
                    }
                    PoolEvent::EvictIdle { worker } => self.pool.evict_if_idle(worker),
                },
            }
        }
        debug!("coordinator exited");
    }

    async fn handle_invoke(&mut self, call: PendingCall) {
        match self.pool.acquire().await {
            Some(worker) => {
                if !self.dispatch(worker, call).await {
                    // The worker was dead on arrival; drain any queued calls
                    // onto the healed capacity.
                    self.dispatch_next().await;
                }
            }
            None => {
                // All busy at the ceiling: queue, or reject on overflow.
                if let Err(overflow) = self.queue.enqueue(call) {
                    debug!(
                        func = %overflow.item.func,
                        limit = overflow.limit,
                        "queue overflow, rejecting call"
                    );
                    let limit = overflow.limit;
                    overflow.item.settle(Err(CallError::QueueOverflow { limit }));
                }
            }
        }
    }

    /// Bind `call` to `worker`, arm its composed cancellation and send the
    /// request.
    ///
    /// Returns `false` when the call could not be handed to the worker; it
    /// has been settled and the worker dealt with, but queued calls may now
    /// face idle capacity the caller must drain.
    async fn dispatch(&mut self, worker: WorkerId, call: PendingCall) -> bool {
        let PendingCall {
            id,
            func,
            args,
            buffers,
            options,
            reply,
        } = call;

        // Options were validated at invocation time, ahead of queueing.
        let composed = match compose(options.cancellation, options.timeout) {
            Ok(composed) => composed,
            Err(err) => {
                let _ = reply.send(Err(CallError::InvalidOptions(err)));
                self.pool.release(worker);
                return false;
            }
        };
        let cancel_guard = composed.map(|signal| {
            let cancel_tx = self.cancel_tx.clone();
            AbortOnDropHandle::new(tokio::spawn(async move {
                let reason = signal.fired().await;
                let _ = cancel_tx.send(CancelFired {
                    worker,
                    call: id,
                    reason,
                });
            }))
        });

        debug!(call = %id, func = %func, worker = %worker, "dispatching call");
        self.in_flight.insert(
            worker,
            InFlight {
                call: id,
                func: func.clone(),
                timeout: options.timeout.duration(),
                reply,
                _cancel: cancel_guard,
            },
        );

        let request = WorkerRequest {
            payload: RequestPayload { func, args, id },
            buffers,
        };
        if self.pool.send(worker, request).is_err() {
            // The worker vanished between acquire and send; treat it like a
            // mid-call termination.
            warn!(worker = %worker, call = %id, "worker channel closed before send");
            if let Some(in_flight) = self.in_flight.remove(&worker) {
                in_flight.settle(Err(CallError::WorkerTerminated));
            }
            self.pool.terminate_worker(worker);
            self.pool.heal().await;
            return false;
        }
        true
    }

    async fn handle_signal(&mut self, worker: WorkerId, signal: WorkerSignal) {
        match signal {
            WorkerSignal::Message(response) => {
                let matches = self
                    .in_flight
                    .get(&worker)
                    .map(|in_flight| in_flight.call == response.id)
                    .unwrap_or(false);
                if !matches {
                    // A response that lost the race against cancellation, or
                    // a reply from a worker we already discarded.
                    debug!(worker = %worker, call = %response.id, "ignoring stale response");
                    return;
                }
                let Some(in_flight) = self.in_flight.remove(&worker) else {
                    return;
                };
                let outcome = response.into_outcome().map_err(CallError::from_worker);
                in_flight.settle(outcome);

                self.pool.release(worker);
                self.dispatch_next().await;
            }
            WorkerSignal::Crash(error) => {
                warn!(worker = %worker, error = %error, "worker crashed");
                if let Some(in_flight) = self.in_flight.remove(&worker) {
                    in_flight.settle(Err(CallError::WorkerCrashed(error)));
                }
                self.pool.terminate_worker(worker);
                self.pool.heal().await;
                self.dispatch_next().await;
            }
            WorkerSignal::Exit => {
                if !self.pool.contains(worker) {
                    // We terminated it ourselves; nothing left to do.
                    return;
                }
                debug!(worker = %worker, "worker exited");
                if let Some(in_flight) = self.in_flight.remove(&worker) {
                    in_flight.settle(Err(CallError::WorkerTerminated));
                }
                self.pool.remove(worker);
                self.pool.heal().await;
                self.dispatch_next().await;
            }
        }
    }

    /// The composed cancellation fired for a dispatched call. The losing
    /// path (a response racing in afterwards) is ignored by the stale
    /// checks in `handle_signal`.
    async fn handle_cancel(&mut self, worker: WorkerId, call: CallId, reason: CancelReason) {
        let matches = self
            .in_flight
            .get(&worker)
            .map(|in_flight| in_flight.call == call)
            .unwrap_or(false);
        if !matches {
            debug!(worker = %worker, call = %call, "cancellation lost the race");
            return;
        }
        let Some(in_flight) = self.in_flight.remove(&worker) else {
            return;
        };

        let error = match reason {
            CancelReason::TimedOut => CallError::Timeout {
                func: in_flight.func.clone(),
                timeout: in_flight.timeout.unwrap_or_default(),
            },
            CancelReason::Aborted => CallError::Aborted {
                func: in_flight.func.clone(),
            },
        };
        debug!(worker = %worker, call = %call, ?reason, "cancelling in-flight call");
        in_flight.settle(Err(error));

        // The worker may be mid-execution in an unknown state; never reuse it.
        self.pool.terminate_worker(worker);
        self.pool.heal().await;
        self.dispatch_next().await;
    }

    /// Drain the queue onto free capacity, oldest call first.
    async fn dispatch_next(&mut self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.pool.acquire().await else {
                return;
            };
            match self.queue.dequeue() {
                Some(call) => {
                    // A failed dispatch settles the call and heals the pool;
                    // the loop then retries the rest of the queue.
                    self.dispatch(worker, call).await;
                }
                None => {
                    self.pool.release(worker);
                    return;
                }
            }
        }
    }

    fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            pool: self.pool.snapshot(),
            queue: QueueSnapshot {
                max_size: self.queue.max_size(),
                calls: self
                    .queue
                    .iter()
                    .map(|call| QueuedCall {
                        id: call.id,
                        func: call.func.clone(),
                    })
                    .collect(),
            },
        }
    }

    /// Terminal teardown: mass-reject everything, stop every worker.
    fn teardown(&mut self) {
        info!(
            outstanding = self.in_flight.len(),
            queued = self.queue.len(),
            "dispatcher terminating"
        );
        for (_, in_flight) in self.in_flight.drain() {
            in_flight.settle(Err(CallError::WorkerTerminated));
        }
        for call in self.queue.drain() {
            call.settle(Err(CallError::WorkerTerminated));
        }
        self.pool.terminate_all();
    }
}
