//! Splits the unassigned backlog across active workers, first come first
//! served, while holding back a reserve for dead-target replacement.

use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{DistributionReport, WorkerAllocation, WorkerEstimate};

/// One distribution policy bound to a store.
#[derive(Clone)]
pub struct Distributor {
    db: Arc<Db>,
    per_worker_cap: u64,
    reserve_floor: u64,
}

impl Distributor {
    pub fn new(db: Arc<Db>, per_worker_cap: u64, reserve_floor: u64) -> Self {
        Self {
            db,
            per_worker_cap,
            reserve_floor,
        }
    }

    pub fn from_config(db: Arc<Db>, config: &EngineConfig) -> Self {
        Self::new(db, config.per_worker_cap, config.reserve_floor)
    }

    /// Assign up to `unassigned - reserve_floor` targets, filling workers in
    /// ascending id order, each up to the per-worker cap.
    ///
    /// Targets are claimed oldest first. A pass with a backlog at or below
    /// the floor assigns nothing and still succeeds.
    ///
    /// # Errors
    ///
    /// [`Error::NoWorkers`] when no worker is active.
    pub async fn distribute(&self) -> Result<DistributionReport> {
        let workers = self.db.list_active_workers().await?;
        if workers.is_empty() {
            return Err(Error::NoWorkers);
        }

        let unassigned_before = self.db.count_unassigned_active().await?;
        let distributable = unassigned_before.saturating_sub(self.reserve_floor);

        let mut remaining = distributable;
        let mut exhausted = false;
        let mut per_worker = Vec::with_capacity(workers.len());
        for worker in &workers {
            // Every active worker gets an entry, zero once supply runs out.
            let assigned = if exhausted || remaining == 0 {
                0
            } else {
                let quota = remaining.min(self.per_worker_cap);
                // A concurrent pass may have claimed some of these; count what we got.
                let assigned = self.db.assign_unassigned_targets(worker.id, quota).await?;
                remaining = remaining.saturating_sub(assigned);
                exhausted = assigned < quota;
                assigned
            };
            per_worker.push(WorkerAllocation {
                worker_id: worker.id,
                assigned,
            });
        }

        let unassigned_after = self.db.count_unassigned_active().await?;
        let report = DistributionReport {
            workers: workers.len() as u64,
            unassigned_before,
            unassigned_after,
            reserve_floor: self.reserve_floor,
            distributable,
            assigned_total: per_worker.iter().map(|a| a.assigned).sum(),
            per_worker,
        };

        info!(
            workers = report.workers,
            unassigned_before,
            distributable,
            assigned = report.assigned_total,
            reserve = report.reserve_remaining(),
            "distribution finished"
        );
        Ok(report)
    }

    /// How many workers the current backlog calls for. Reads only.
    pub async fn estimate(&self) -> Result<WorkerEstimate> {
        let unassigned = self.db.count_unassigned_active().await?;
        let active_workers = self.db.list_active_workers().await?.len() as u64;
        let distributable = unassigned.saturating_sub(self.reserve_floor);

        Ok(WorkerEstimate {
            unassigned,
            reserve_floor: self.reserve_floor,
            distributable,
            per_worker_cap: self.per_worker_cap,
            active_workers,
            needed_workers: needed_workers(distributable, self.per_worker_cap),
        })
    }
}

/// `ceil(distributable / cap)`; zero for a zero cap.
pub fn needed_workers(distributable: u64, per_worker_cap: u64) -> u64 {
    if per_worker_cap == 0 {
        return 0;
    }
    distributable.div_ceil(per_worker_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needed_workers_rounds_up() {
        assert_eq!(needed_workers(0, 1000), 0);
        assert_eq!(needed_workers(1, 1000), 1);
        assert_eq!(needed_workers(1000, 1000), 1);
        assert_eq!(needed_workers(1001, 1000), 2);
        assert_eq!(needed_workers(2500, 1000), 3);
    }

    #[test]
    fn zero_cap_needs_nobody() {
        assert_eq!(needed_workers(50, 0), 0);
    }
}
