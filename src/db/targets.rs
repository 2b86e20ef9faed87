//! Target ingestion with dedup on canonical form, and reserve accounting.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::link;
use crate::model::{IngestReport, Target, TargetId};
use crate::telemetry::metrics;

impl super::Db {
    /// Normalize, dedupe and insert a batch of raw target strings.
    ///
    /// Strings the link classifier rejects are counted, not stored. Repeats
    /// within the batch and rows whose canonical form already exists are
    /// skipped by the UNIQUE constraint on `targets.link`.
    pub async fn ingest_targets<I, S>(&self, raw: I, source: &str) -> Result<IngestReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = IngestReport::default();
        let mut seen = HashSet::new();
        let mut batch = Vec::new();

        for item in raw {
            report.received += 1;
            match link::parse(item.as_ref()) {
                Ok(parsed) => {
                    let canonical = parsed.canonical();
                    if seen.insert(canonical.clone()) {
                        batch.push((canonical, parsed.kind));
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    debug!(raw = item.as_ref(), error = %e, "rejected target");
                    report.rejected += 1;
                }
            }
        }

        if !batch.is_empty() {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;
            for (canonical, kind) in &batch {
                let rows = sqlx::query(
                    "INSERT OR IGNORE INTO targets (link, kind, source, status, created_at)
                     VALUES (?1, ?2, ?3, 'active', ?4)",
                )
                .bind(canonical)
                .bind(kind.as_str())
                .bind(source)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if rows > 0 {
                    report.added += 1;
                } else {
                    report.duplicates += 1;
                }
            }
            tx.commit().await?;
        }

        let counter = metrics::targets_ingested();
        counter.add(report.added, &[KeyValue::new("result", "added")]);
        counter.add(report.duplicates, &[KeyValue::new("result", "duplicate")]);
        counter.add(report.rejected, &[KeyValue::new("result", "rejected")]);

        info!(
            source,
            received = report.received,
            added = report.added,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "targets ingested"
        );
        Ok(report)
    }

    /// Ingest a batch and return only the number of genuinely new targets.
    pub async fn add_targets<I, S>(&self, raw: I, source: &str) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.ingest_targets(raw, source).await?.added)
    }

    /// Size of the reserve pool right now: active targets with no assignment.
    ///
    /// Not fenced against concurrent claims; callers must tolerate a stale count.
    pub async fn count_unassigned_active(&self) -> Result<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM targets t
             WHERE t.status = 'active'
             AND NOT EXISTS (SELECT 1 FROM assignments a WHERE a.target_id = t.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(super::count(n))
    }

    /// Get a target by id.
    pub async fn get_target(&self, id: TargetId) -> Result<Target> {
        let row: Option<TargetRow> = sqlx::query_as(
            "SELECT id, link, kind, source, status, created_at FROM targets WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("target {id}")))?
            .try_into_target()
    }

    /// Look a target up by any raw form of its link.
    pub async fn find_target(&self, raw: &str) -> Result<Option<Target>> {
        let Ok(canonical) = link::normalize(raw) else {
            return Ok(None);
        };
        let row: Option<TargetRow> = sqlx::query_as(
            "SELECT id, link, kind, source, status, created_at FROM targets WHERE link = ?1",
        )
        .bind(canonical)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TargetRow::try_into_target).transpose()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TargetRow {
    id: i64,
    link: String,
    kind: String,
    source: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TargetRow {
    fn try_into_target(self) -> Result<Target> {
        Ok(Target {
            id: TargetId(self.id),
            kind: self
                .kind
                .parse()
                .map_err(|_| Error::InvalidStatus {
                    kind: "link kind",
                    value: self.kind.clone(),
                })?,
            link: self.link,
            source: self.source,
            status: self.status.parse()?,
            created_at: self.created_at,
        })
    }
}
