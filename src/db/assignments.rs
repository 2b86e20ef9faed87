//! Assignment claims and status transitions.
//!
//! A target gets at most one assignment for its whole lifetime, enforced by
//! the UNIQUE constraint on `assignments.target_id`. Claims use
//! `INSERT OR IGNORE`: a row another caller claimed first is skipped, not an
//! error. That skip is the only conflict resolution between concurrent
//! distributors and join loops.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{
    Assignment, AssignmentId, AssignmentStatus, PendingAssignment, Replacement, TargetId,
    WorkerId, truncate_detail,
};
use crate::telemetry::metrics;

/// Claim attempts per replacement before giving up on a contended reserve.
const MAX_CLAIM_ROUNDS: usize = 8;

impl super::Db {
    /// Assign up to `max_count` unassigned active targets to a worker, in
    /// target insertion order. Returns how many this call actually claimed.
    pub async fn assign_unassigned_targets(&self, worker_id: WorkerId, max_count: u64) -> Result<u64> {
        if max_count == 0 {
            return Ok(0);
        }
        let limit = i64::try_from(max_count).unwrap_or(i64::MAX);

        let candidates: Vec<(i64,)> = sqlx::query_as(
            "SELECT t.id FROM targets t
             WHERE t.status = 'active'
             AND NOT EXISTS (SELECT 1 FROM assignments a WHERE a.target_id = t.id)
             ORDER BY t.id ASC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut assigned = 0u64;
        let mut tx = self.pool.begin().await?;
        for (target_id,) in &candidates {
            if claim(&mut tx, worker_id, TargetId(*target_id), now).await? {
                assigned += 1;
            }
        }
        tx.commit().await?;

        let skipped = candidates.len() as u64 - assigned;
        if skipped > 0 {
            debug!(worker_id = %worker_id, skipped, "targets claimed by a concurrent caller");
        }
        metrics::assignments_created().add(assigned, &[KeyValue::new("path", "distribute")]);
        Ok(assigned)
    }

    /// Pending assignments of a worker, oldest first.
    pub async fn pending_assignments_for(
        &self,
        worker_id: WorkerId,
        limit: u64,
    ) -> Result<Vec<PendingAssignment>> {
        let rows: Vec<PendingRow> = sqlx::query_as(
            "SELECT a.id, a.target_id, t.link, t.kind, a.attempts
             FROM assignments a
             JOIN targets t ON t.id = a.target_id
             WHERE a.worker_id = ?1 AND a.status = 'pending'
             ORDER BY a.id ASC
             LIMIT ?2",
        )
        .bind(worker_id.0)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PendingRow::try_into_pending).collect()
    }

    /// Get the assignment of a target, if it has one.
    pub async fn assignment_for_target(&self, target_id: TargetId) -> Result<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT id, target_id, worker_id, status, attempts, last_error, assigned_at, completed_at
             FROM assignments WHERE target_id = ?1",
        )
        .bind(target_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AssignmentRow::try_into_assignment).transpose()
    }

    /// Every assignment of a worker, in creation order.
    pub async fn assignments_for(&self, worker_id: WorkerId) -> Result<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            "SELECT id, target_id, worker_id, status, attempts, last_error, assigned_at, completed_at
             FROM assignments WHERE worker_id = ?1 ORDER BY id ASC",
        )
        .bind(worker_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(AssignmentRow::try_into_assignment)
            .collect()
    }

    /// Pending → success. Also counts toward the worker's processed total.
    ///
    /// Returns false when the assignment was no longer pending.
    pub async fn mark_success(&self, worker_id: WorkerId, target_id: TargetId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let done = finish(&mut tx, worker_id, target_id, AssignmentStatus::Success, None).await?;
        tx.commit().await?;
        Ok(done)
    }

    /// Pending → failed with a reason. Also counts toward the worker's
    /// processed total.
    pub async fn mark_failed(&self, worker_id: WorkerId, target_id: TargetId, reason: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let done = finish(
            &mut tx,
            worker_id,
            target_id,
            AssignmentStatus::Failed,
            Some(reason),
        )
        .await?;
        tx.commit().await?;
        Ok(done)
    }

    /// Record a retry attempt without leaving `pending`.
    pub async fn bump_attempt(&self, worker_id: WorkerId, target_id: TargetId, reason: &str) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE assignments SET attempts = attempts + 1, last_error = ?1
             WHERE worker_id = ?2 AND target_id = ?3 AND status = 'pending'",
        )
        .bind(truncate_detail(reason))
        .bind(worker_id.0)
        .bind(target_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Retire a dead target and bind one reserve target to the same worker.
    ///
    /// In one transaction: the assignment becomes `failed`, its target `dead`,
    /// and the oldest unassigned active target is claimed for `worker_id`.
    /// With an empty reserve the dead target and failed assignment are still
    /// committed. An assignment that already left `pending` is rolled back
    /// untouched. Never waits for the reserve to refill.
    pub async fn replace_dead_assignment(
        &self,
        worker_id: WorkerId,
        dead_target_id: TargetId,
        reason: &str,
    ) -> Result<Replacement> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let was_pending = finish(
            &mut tx,
            worker_id,
            dead_target_id,
            AssignmentStatus::Failed,
            Some(reason),
        )
        .await?;
        if !was_pending {
            // Already finished elsewhere; replacing it would hand the worker
            // an extra target.
            warn!(worker_id = %worker_id, target_id = %dead_target_id, "dead target was not pending, no replacement");
            tx.rollback().await?;
            return Ok(Replacement::NotPending);
        }

        sqlx::query("UPDATE targets SET status = 'dead' WHERE id = ?1")
            .bind(dead_target_id.0)
            .execute(&mut *tx)
            .await?;

        let mut replacement = None;
        for _ in 0..MAX_CLAIM_ROUNDS {
            let candidate: Option<(i64,)> = sqlx::query_as(
                "SELECT t.id FROM targets t
                 WHERE t.status = 'active'
                 AND NOT EXISTS (SELECT 1 FROM assignments a WHERE a.target_id = t.id)
                 ORDER BY t.id ASC
                 LIMIT 1",
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some((target_id,)) = candidate else {
                break;
            };
            let target_id = TargetId(target_id);
            if claim(&mut tx, worker_id, target_id, now).await? {
                replacement = Some(target_id);
                break;
            }
        }

        let outcome = match replacement {
            Some(target_id) => {
                let row: PendingRow = sqlx::query_as(
                    "SELECT a.id, a.target_id, t.link, t.kind, a.attempts
                     FROM assignments a
                     JOIN targets t ON t.id = a.target_id
                     WHERE a.target_id = ?1",
                )
                .bind(target_id.0)
                .fetch_one(&mut *tx)
                .await?;
                Replacement::Claimed(row.try_into_pending()?)
            }
            None => Replacement::ReserveEmpty,
        };

        tx.commit().await?;

        match outcome {
            Replacement::Claimed(_) => {
                metrics::assignments_created().add(1, &[KeyValue::new("path", "replacement")]);
            }
            _ => metrics::reserve_exhausted().add(1, &[]),
        }
        Ok(outcome)
    }
}

/// Insert one assignment row. False when the target was already claimed.
async fn claim(
    tx: &mut Transaction<'_, Sqlite>,
    worker_id: WorkerId,
    target_id: TargetId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        "INSERT OR IGNORE INTO assignments (target_id, worker_id, status, attempts, assigned_at)
         VALUES (?1, ?2, 'pending', 0, ?3)",
    )
    .bind(target_id.0)
    .bind(worker_id.0)
    .bind(now)
    .execute(&mut **tx)
    .await?
    .rows_affected();
    Ok(rows > 0)
}

/// Move a pending assignment to a terminal status and bump the worker's
/// processed counter. False when the assignment was not pending.
async fn finish(
    tx: &mut Transaction<'_, Sqlite>,
    worker_id: WorkerId,
    target_id: TargetId,
    status: AssignmentStatus,
    reason: Option<&str>,
) -> Result<bool> {
    debug_assert!(status.is_terminal());

    let rows = sqlx::query(
        "UPDATE assignments
         SET status = ?1, attempts = attempts + 1, last_error = COALESCE(?2, last_error), completed_at = ?3
         WHERE worker_id = ?4 AND target_id = ?5 AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(reason.map(truncate_detail))
    .bind(Utc::now())
    .bind(worker_id.0)
    .bind(target_id.0)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if rows == 0 {
        return Ok(false);
    }

    sqlx::query("UPDATE workers SET links_processed = links_processed + 1 WHERE id = ?1")
        .bind(worker_id.0)
        .execute(&mut **tx)
        .await?;
    Ok(true)
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct PendingRow {
    id: i64,
    target_id: i64,
    link: String,
    kind: String,
    attempts: i64,
}

impl PendingRow {
    fn try_into_pending(self) -> Result<PendingAssignment> {
        Ok(PendingAssignment {
            assignment_id: AssignmentId(self.id),
            target_id: TargetId(self.target_id),
            kind: self.kind.parse().map_err(|_| Error::InvalidStatus {
                kind: "link kind",
                value: self.kind.clone(),
            })?,
            target: self.link,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
        })
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: i64,
    target_id: i64,
    worker_id: i64,
    status: String,
    attempts: i64,
    last_error: Option<String>,
    assigned_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl AssignmentRow {
    fn try_into_assignment(self) -> Result<Assignment> {
        Ok(Assignment {
            id: AssignmentId(self.id),
            target_id: TargetId(self.target_id),
            worker_id: WorkerId(self.worker_id),
            status: self.status.parse()?,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            last_error: self.last_error,
            assigned_at: self.assigned_at,
            completed_at: self.completed_at,
        })
    }
}
