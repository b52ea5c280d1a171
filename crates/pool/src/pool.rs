//! Elastic pool of worker records.
//!
//! The pool keeps between `min_workers` and `max_workers` live workers:
//! the floor is spawned eagerly and kept warm, bursts grow the pool up to
//! the ceiling, and surplus workers are evicted after sitting idle for
//! `terminate_idle_delay`. Crash and exit signals remove records; dropping
//! below the floor triggers a best-effort respawn, the only self-healing in
//! the system.
//!
//! The pool is owned and mutated exclusively by the dispatcher's
//! coordinator task. Timers and worker signals re-enter as [`PoolEvent`]s
//! on the channel given at construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use threadmill_protocol::{
    SpawnError, WorkerHandle, WorkerId, WorkerRequest, WorkerSignal, WorkerSpawner,
};

use crate::config::DispatcherConfig;
use crate::snapshot::{PoolSnapshot, WorkerStatus};

/// Pool-originated event delivered to the coordinator loop.
#[derive(Debug)]
pub enum PoolEvent {
    /// A worker spoke (response, crash or exit).
    Signal {
        worker: WorkerId,
        signal: WorkerSignal,
    },
    /// An idle-eviction timer fired for this worker.
    EvictIdle { worker: WorkerId },
}

struct WorkerRecord {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    shutdown: CancellationToken,
    busy: bool,
    /// Pending idle-eviction timer; aborted by drop on re-acquire.
    evict_timer: Option<AbortOnDropHandle<()>>,
}

/// Set of live workers with busy/idle tracking, elastic sizing and
/// self-healing.
pub struct WorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    min_workers: usize,
    max_workers: usize,
    terminate_idle_delay: Duration,
    respawn_cooldown: Option<Duration>,
    last_respawn: Option<Instant>,
    workers: HashMap<WorkerId, WorkerRecord>,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl WorkerPool {
    /// Create the pool and eagerly spawn the floor of `min_workers`.
    pub async fn new(
        spawner: Arc<dyn WorkerSpawner>,
        config: &DispatcherConfig,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Result<Self, SpawnError> {
        let mut pool = Self {
            spawner,
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            terminate_idle_delay: config.terminate_idle_delay,
            respawn_cooldown: config.respawn_cooldown,
            last_respawn: None,
            workers: HashMap::new(),
            events,
        };
        for _ in 0..pool.min_workers {
            pool.spawn_worker().await?;
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn min_workers(&self) -> usize {
        self.min_workers
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    fn idle_count(&self) -> usize {
        self.workers.values().filter(|w| !w.busy).count()
    }

    /// Hand out an idle worker, growing the pool if allowed.
    ///
    /// Returns `None` when every worker is busy and the ceiling is reached;
    /// the caller must queue.
    pub async fn acquire(&mut self) -> Option<WorkerId> {
        for (id, record) in self.workers.iter_mut() {
            if !record.busy {
                record.busy = true;
                // A pending eviction no longer applies.
                record.evict_timer = None;
                debug!(worker = %id, "acquired idle worker");
                return Some(*id);
            }
        }

        if self.workers.len() >= self.max_workers {
            return None;
        }

        match self.spawn_worker().await {
            Ok(id) => {
                if let Some(record) = self.workers.get_mut(&id) {
                    record.busy = true;
                }
                debug!(worker = %id, size = self.workers.len(), "grew pool for busy call");
                Some(id)
            }
            Err(err) => {
                warn!(error = %err, "worker spawn failed during acquire");
                None
            }
        }
    }

    /// Return a worker to idle. Surplus idle workers above the floor get a
    /// deferred eviction timer; re-acquiring cancels it.
    pub fn release(&mut self, id: WorkerId) {
        let surplus = {
            let Some(record) = self.workers.get_mut(&id) else {
                return;
            };
            record.busy = false;
            self.idle_count() > self.min_workers
        };

        if surplus {
            let events = self.events.clone();
            let delay = self.terminate_idle_delay;
            let timer = AbortOnDropHandle::new(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(PoolEvent::EvictIdle { worker: id });
            }));
            if let Some(record) = self.workers.get_mut(&id) {
                record.evict_timer = Some(timer);
            }
        }
    }

    /// Eviction timer callback. Re-checks state: the fire may have raced a
    /// re-acquire or a pool shrink.
    pub fn evict_if_idle(&mut self, id: WorkerId) {
        let still_idle = self
            .workers
            .get(&id)
            .map(|record| !record.busy)
            .unwrap_or(false);
        if !still_idle || self.workers.len() <= self.min_workers {
            return;
        }
        debug!(worker = %id, "evicting idle worker above floor");
        self.terminate_worker(id);
    }

    /// Immediately terminate and remove a worker, whatever its state. Used
    /// on timeout, abort and crash handling: such a worker is in an unknown
    /// state and must never be reused.
    pub fn terminate_worker(&mut self, id: WorkerId) {
        if let Some(record) = self.workers.remove(&id) {
            record.shutdown.cancel();
            debug!(worker = %id, size = self.workers.len(), "terminated worker");
        }
    }

    /// Remove a record for a worker that already died on its own.
    pub fn remove(&mut self, id: WorkerId) {
        if self.workers.remove(&id).is_some() {
            debug!(worker = %id, size = self.workers.len(), "removed dead worker");
        }
    }

    /// Terminate every worker and clear the pool. Full teardown only.
    pub fn terminate_all(&mut self) {
        for (id, record) in self.workers.drain() {
            record.shutdown.cancel();
            debug!(worker = %id, "terminated worker during teardown");
        }
    }

    /// Restore the floor after a loss, best effort. With a respawn cooldown
    /// configured, attempts inside the window are skipped and the floor is
    /// restored on the next acquire or healing opportunity.
    pub async fn heal(&mut self) {
        if self.workers.len() >= self.min_workers {
            return;
        }
        if let (Some(cooldown), Some(last)) = (self.respawn_cooldown, self.last_respawn) {
            if last.elapsed() < cooldown {
                debug!(
                    size = self.workers.len(),
                    floor = self.min_workers,
                    "respawn cooldown active, deferring heal"
                );
                return;
            }
        }
        while self.workers.len() < self.min_workers {
            match self.spawn_worker().await {
                Ok(id) => {
                    self.last_respawn = Some(Instant::now());
                    debug!(worker = %id, size = self.workers.len(), "respawned worker to restore floor");
                }
                Err(err) => {
                    warn!(error = %err, "respawn failed; floor restored on next opportunity");
                    break;
                }
            }
        }
    }

    /// Send a request to a busy worker. Fails when the worker's channel is
    /// already gone (crashed between acquire and send).
    pub fn send(&self, id: WorkerId, request: WorkerRequest) -> Result<(), ()> {
        let Some(record) = self.workers.get(&id) else {
            return Err(());
        };
        record.requests.send(request).map_err(|_| ())
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            workers: self
                .workers
                .iter()
                .map(|(id, record)| WorkerStatus {
                    id: *id,
                    busy: record.busy,
                })
                .collect(),
        }
    }

    async fn spawn_worker(&mut self) -> Result<WorkerId, SpawnError> {
        let WorkerHandle {
            id,
            requests,
            mut signals,
            shutdown,
        } = self.spawner.spawn().await?;

        // Pump this worker's signals into the coordinator's event channel.
        // The pump dies with the worker (its signal sender drops) or with
        // the coordinator (send fails).
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                if events.send(PoolEvent::Signal { worker: id, signal }).is_err() {
                    break;
                }
            }
        });

        self.workers.insert(
            id,
            WorkerRecord {
                requests,
                shutdown,
                busy: false,
                evict_timer: None,
            },
        );
        Ok(id)
    }
}
