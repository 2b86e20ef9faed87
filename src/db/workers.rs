//! Worker registry. Provisioning hands in already-authenticated credentials;
//! workers are soft-disabled, never deleted.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Worker, WorkerId, WorkerStatus};

impl super::Db {
    /// Register a worker. Returns `None` when the credential is already known.
    pub async fn add_worker(&self, credential: &SecretString, label: &str) -> Result<Option<WorkerId>> {
        let id: Option<(i64,)> = sqlx::query_as(
            "INSERT OR IGNORE INTO workers (credential, label, status, links_processed, created_at)
             VALUES (?1, ?2, 'active', 0, ?3)
             RETURNING id",
        )
        .bind(credential.expose_secret().trim())
        .bind(label.trim())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let id = id.map(|(id,)| WorkerId(id));
        if let Some(id) = id {
            info!(worker_id = %id, "worker registered");
        }
        Ok(id)
    }

    /// Get a worker by id.
    pub async fn get_worker(&self, id: WorkerId) -> Result<Worker> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT id, credential, label, status, links_processed, created_at
             FROM workers WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("worker {id}")))?
            .try_into_worker()
    }

    /// Active workers in ascending id order. Distribution fills them in this order.
    pub async fn list_active_workers(&self) -> Result<Vec<Worker>> {
        self.query_workers(Some(WorkerStatus::Active)).await
    }

    /// Every worker, active or not, in ascending id order.
    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.query_workers(None).await
    }

    async fn query_workers(&self, status: Option<WorkerStatus>) -> Result<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT id, credential, label, status, links_processed, created_at
             FROM workers
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY id ASC",
        )
        .bind(status.map(WorkerStatus::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkerRow::try_into_worker).collect()
    }

    /// Set a worker's lifecycle status. Returns false if the worker does not exist.
    pub async fn set_worker_status(&self, id: WorkerId, status: WorkerStatus) -> Result<bool> {
        let rows = sqlx::query("UPDATE workers SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows > 0 {
            info!(worker_id = %id, %status, "worker status changed");
        }
        Ok(rows > 0)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: i64,
    credential: String,
    label: String,
    status: String,
    links_processed: i64,
    created_at: DateTime<Utc>,
}

impl WorkerRow {
    fn try_into_worker(self) -> Result<Worker> {
        Ok(Worker {
            id: WorkerId(self.id),
            credential: SecretString::from(self.credential),
            label: self.label,
            status: self.status.parse()?,
            links_processed: self.links_processed,
            created_at: self.created_at,
        })
    }
}
