//! Aggregate counts for reporting.

use super::count;
use crate::error::Result;
use crate::model::Statistics;

impl super::Db {
    /// Derived counts over the committed state. One statement, so every
    /// figure comes from the same snapshot. Nothing is cached.
    pub async fn statistics(&self) -> Result<Statistics> {
        let row: StatsRow = sqlx::query_as(
            "SELECT
                (SELECT COUNT(*) FROM workers WHERE status = 'active') AS workers,
                (SELECT COUNT(*) FROM targets) AS total_targets,
                (SELECT COUNT(*) FROM assignments) AS assigned,
                (SELECT COUNT(*) FROM targets t
                    WHERE NOT EXISTS (SELECT 1 FROM assignments a WHERE a.target_id = t.id)) AS unassigned,
                (SELECT COUNT(*) FROM targets t
                    WHERE t.status = 'active'
                    AND NOT EXISTS (SELECT 1 FROM assignments a WHERE a.target_id = t.id)) AS reserve,
                (SELECT COUNT(*) FROM targets WHERE status = 'dead') AS dead,
                (SELECT COUNT(*) FROM assignments WHERE status = 'pending') AS pending,
                (SELECT COUNT(*) FROM assignments WHERE status = 'success') AS success,
                (SELECT COUNT(*) FROM assignments WHERE status = 'failed') AS failed",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Statistics {
            workers: count(row.workers),
            total_targets: count(row.total_targets),
            assigned: count(row.assigned),
            unassigned: count(row.unassigned),
            reserve: count(row.reserve),
            dead: count(row.dead),
            pending: count(row.pending),
            success: count(row.success),
            failed: count(row.failed),
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    workers: i64,
    total_targets: i64,
    assigned: i64,
    unassigned: i64,
    reserve: i64,
    dead: i64,
    pending: i64,
    success: i64,
    failed: i64,
}
