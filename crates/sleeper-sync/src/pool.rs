//! Bounded dispatch queue feeding a fixed set of worker tasks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use sleeper_core::SyncKey;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::orchestrator::SyncRunner;
use crate::planner::PlanRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Enqueued,
    /// Same key already queued or running; collapsed into it.
    Deduplicated,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("sync queue is full")]
    QueueFull,
    #[error("worker pool is shut down")]
    Closed,
}

type InFlight = Arc<StdMutex<HashSet<SyncKey>>>;

/// Releases an in-flight key when the job finishes, even on panic.
struct InFlightGuard {
    key: SyncKey,
    in_flight: InFlight,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.key);
        }
    }
}

pub struct WorkerPool {
    sender: StdMutex<Option<mpsc::Sender<PlanRequest>>>,
    in_flight: InFlight,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("in_flight", &self.in_flight_len())
            .finish()
    }
}

impl WorkerPool {
    pub fn start(runner: Arc<dyn SyncRunner>, workers: usize, queue_capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<PlanRequest>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let in_flight: InFlight = Arc::new(StdMutex::new(HashSet::new()));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let runner = Arc::clone(&runner);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(request) = next else { break };
                        let _guard = InFlightGuard {
                            key: request.dedup_key(),
                            in_flight: Arc::clone(&in_flight),
                        };
                        let target = request.lock_name();
                        match runner.run(request).await {
                            Ok(report) => debug!(worker, lock = %target, tasks = report.tasks.len(), "job done"),
                            Err(err) => error!(worker, lock = %target, error = %err, "sync run failed"),
                        }
                    }
                    debug!(worker, "worker stopped");
                })
            })
            .collect();

        info!(workers = workers.max(1), queue_capacity, "worker pool started");
        Arc::new(Self {
            sender: StdMutex::new(Some(tx)),
            in_flight,
            workers: Mutex::new(handles),
        })
    }

    /// Enqueues without waiting. A request whose key is already queued or
    /// running is acknowledged as deduplicated.
    pub fn dispatch(&self, request: PlanRequest) -> Result<DispatchOutcome, DispatchError> {
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or(DispatchError::Closed)?;

        let key = request.dedup_key();
        {
            let mut set = self.in_flight.lock().map_err(|_| DispatchError::Closed)?;
            if !set.insert(key.clone()) {
                debug!(%key, "already in flight");
                return Ok(DispatchOutcome::Deduplicated);
            }
        }

        match sender.try_send(request) {
            Ok(()) => Ok(DispatchOutcome::Enqueued),
            Err(err) => {
                if let Ok(mut set) = self.in_flight.lock() {
                    set.remove(&key);
                }
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(%key, "queue full; rejecting trigger");
                        Err(DispatchError::QueueFull)
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(DispatchError::Closed),
                }
            }
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    /// Stops accepting work, lets queued jobs finish and joins every worker.
    pub async fn shutdown(&self) {
        if let Ok(mut slot) = self.sender.lock() {
            slot.take();
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker panicked");
            }
        }
        info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sleeper_core::{EntityKind, SyncMode};
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    use crate::orchestrator::{RunReport, SyncError};

    /// Each run waits for one permit.
    struct GatedRunner {
        gate: Semaphore,
        runs: StdMutex<Vec<SyncKey>>,
    }

    impl GatedRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                runs: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SyncRunner for GatedRunner {
        async fn run(&self, request: PlanRequest) -> Result<RunReport, SyncError> {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            if let Ok(mut runs) = self.runs.lock() {
                runs.push(request.dedup_key());
            }
            Ok(RunReport {
                run_id: Uuid::new_v4(),
                deduplicated: false,
                lock_contended: false,
                tasks: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_while_in_flight() {
        let runner = GatedRunner::new();
        let pool = WorkerPool::start(runner.clone(), 2, 8);

        let req = PlanRequest::for_entity(EntityKind::Rosters, "L1", SyncMode::Incremental);
        assert_eq!(pool.dispatch(req.clone()), Ok(DispatchOutcome::Enqueued));
        assert_eq!(pool.dispatch(req.clone()), Ok(DispatchOutcome::Deduplicated));
        let other = PlanRequest::league("L2", SyncMode::Incremental);
        assert_eq!(pool.dispatch(other), Ok(DispatchOutcome::Enqueued));

        runner.gate.add_permits(8);
        pool.shutdown().await;

        assert_eq!(runner.runs.lock().map(|r| r.len()).unwrap_or(0), 2);
        assert_eq!(pool.in_flight_len(), 0);
        assert_eq!(pool.dispatch(req), Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let runner = GatedRunner::new();
        let pool = WorkerPool::start(runner.clone(), 1, 1);

        let mut outcomes = Vec::new();
        for league in ["A", "B", "C", "D"] {
            outcomes.push(pool.dispatch(PlanRequest::league(league, SyncMode::Incremental)));
            tokio::task::yield_now().await;
        }

        assert!(outcomes.contains(&Err(DispatchError::QueueFull)));
        assert!(pool.in_flight_len() <= 2);
    }
}
