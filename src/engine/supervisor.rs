//! Supervisor: runs one join loop per worker, concurrently, and stops them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::join_loop::{JoinLoop, JoinSettings};
use super::pacer::{Pacer, TokioPacer};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{WorkerId, WorkerSummary};
use crate::platform::Platform;

struct RunningLoop {
    stop: CancellationToken,
    handle: JoinHandle<Result<WorkerSummary>>,
}

/// A worker loop that ended with an error instead of a summary.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerFailure {
    pub worker_id: WorkerId,
    pub error: String,
}

/// Everything collected by [`JoinSupervisor::wait`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub summaries: Vec<WorkerSummary>,
    pub failures: Vec<WorkerFailure>,
}

impl RunReport {
    pub fn total_success(&self) -> u64 {
        self.summaries.iter().map(|s| s.success_count).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.summaries.iter().map(|s| s.failed_count).sum()
    }
}

/// Starts and stops per-worker join loops.
///
/// Loops share nothing but the store and the platform handle. Each gets a
/// child of the supervisor's stop token, so a worker can be stopped alone
/// or all of them at once.
pub struct JoinSupervisor<P: Platform, S: Pacer + Clone = TokioPacer> {
    db: Arc<Db>,
    platform: Arc<P>,
    pacer: S,
    settings: JoinSettings,
    run_id: Uuid,
    stop: CancellationToken,
    running: Arc<Mutex<HashMap<WorkerId, RunningLoop>>>,
}

impl<P: Platform, S: Pacer + Clone> Clone for JoinSupervisor<P, S> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            platform: Arc::clone(&self.platform),
            pacer: self.pacer.clone(),
            settings: self.settings.clone(),
            run_id: self.run_id,
            stop: self.stop.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

impl<P: Platform> JoinSupervisor<P> {
    pub fn new(db: Arc<Db>, platform: Arc<P>, settings: JoinSettings) -> Self {
        Self {
            db,
            platform,
            pacer: TokioPacer,
            settings,
            run_id: Uuid::new_v4(),
            stop: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<P: Platform, S: Pacer + Clone> JoinSupervisor<P, S> {
    /// Replace the pacer handed to every loop started afterwards.
    pub fn with_pacer<T: Pacer + Clone>(self, pacer: T) -> JoinSupervisor<P, T> {
        JoinSupervisor {
            db: self.db,
            platform: self.platform,
            pacer,
            settings: self.settings,
            run_id: self.run_id,
            stop: self.stop,
            running: self.running,
        }
    }

    /// Correlation id shared by every loop of this supervisor.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn running(&self) -> MutexGuard<'_, HashMap<WorkerId, RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the loop for one worker.
    ///
    /// Returns false if a loop for that worker was already started and has
    /// not been collected by [`wait`](Self::wait).
    pub fn start_worker(&self, worker_id: WorkerId) -> bool {
        let mut running = self.running();
        if running.contains_key(&worker_id) {
            warn!(worker_id = %worker_id, "join loop already started");
            return false;
        }

        let stop = self.stop.child_token();
        let join_loop = JoinLoop::new(
            Arc::clone(&self.db),
            Arc::clone(&self.platform),
            self.settings.clone(),
            stop.clone(),
        )
        .with_pacer(self.pacer.clone());
        let run_id = self.run_id;

        let handle = tokio::spawn(async move { join_loop.run_as(worker_id, run_id).await });
        running.insert(worker_id, RunningLoop { stop, handle });
        info!(worker_id = %worker_id, run_id = %run_id, "join loop spawned");
        true
    }

    /// Spawn a loop for every active worker. Returns how many were started.
    ///
    /// # Errors
    ///
    /// [`Error::NoWorkers`] when no worker is active.
    pub async fn start_all(&self) -> Result<usize> {
        let workers = self.db.list_active_workers().await?;
        if workers.is_empty() {
            return Err(Error::NoWorkers);
        }
        Ok(workers
            .iter()
            .filter(|worker| self.start_worker(worker.id))
            .count())
    }

    /// Ask one worker's loop to stop at its next boundary.
    pub fn stop_worker(&self, worker_id: WorkerId) -> bool {
        match self.running().get(&worker_id) {
            Some(run) => {
                run.stop.cancel();
                info!(worker_id = %worker_id, "stop requested");
                true
            }
            None => false,
        }
    }

    /// Ask every loop, current and future, to stop.
    pub fn stop_all(&self) {
        info!(run_id = %self.run_id, "stop requested for all workers");
        self.stop.cancel();
    }

    pub fn is_running(&self, worker_id: WorkerId) -> bool {
        self.running()
            .get(&worker_id)
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Wait for every started loop to end and collect the results.
    pub async fn wait(&self) -> RunReport {
        let mut started: Vec<(WorkerId, RunningLoop)> = self.running().drain().collect();
        started.sort_by_key(|(worker_id, _)| *worker_id);

        let mut summaries = Vec::with_capacity(started.len());
        let mut failures = Vec::new();
        for (worker_id, run) in started {
            match run.handle.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => {
                    error!(worker_id = %worker_id, "join loop failed: {e}");
                    failures.push(WorkerFailure {
                        worker_id,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(worker_id = %worker_id, "join loop task aborted: {e}");
                    failures.push(WorkerFailure {
                        worker_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        RunReport {
            run_id: self.run_id,
            summaries,
            failures,
        }
    }

    /// Start every active worker and wait for all of them.
    pub async fn run_all(&self) -> Result<RunReport> {
        self.start_all().await?;
        Ok(self.wait().await)
    }
}
