//! Append-only join event log.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::Result;
use crate::event::Outcome;
use crate::model::{EventLogEntry, WorkerId, truncate_detail};

impl super::Db {
    /// Append one event. Fire-and-forget: a failed append is logged and
    /// swallowed so it can never abort the caller.
    pub async fn log_event(&self, worker_id: Option<WorkerId>, target: &str, outcome: Outcome, detail: &str) {
        let result = sqlx::query(
            "INSERT INTO events (worker_id, target, outcome, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(worker_id.map(|w| w.0))
        .bind(target)
        .bind(outcome.as_str())
        .bind(truncate_detail(detail))
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(link = target, %outcome, "event log append failed: {e}");
        }
    }

    /// Most recent events first, optionally for one worker only.
    pub async fn recent_events(&self, worker_id: Option<WorkerId>, limit: u64) -> Result<Vec<EventLogEntry>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, worker_id, target, outcome, detail, created_at
             FROM events
             WHERE (?1 IS NULL OR worker_id = ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(worker_id.map(|w| w.0))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::try_into_entry).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    worker_id: Option<i64>,
    target: String,
    outcome: String,
    detail: String,
    created_at: DateTime<Utc>,
}

impl EventRow {
    fn try_into_entry(self) -> Result<EventLogEntry> {
        Ok(EventLogEntry {
            id: self.id,
            worker_id: self.worker_id.map(WorkerId),
            target: self.target,
            outcome: self.outcome.parse()?,
            detail: self.detail,
            created_at: self.created_at,
        })
    }
}
