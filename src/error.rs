//! Error types for joinq.

use thiserror::Error;

use crate::model::WorkerId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no active workers")]
    NoWorkers,

    #[error("worker {0} is disabled")]
    WorkerDisabled(WorkerId),

    /// The platform refused the worker's credential or could not open a session.
    /// Fatal for that worker's loop; never retried automatically.
    #[error("worker {worker_id} could not connect: {reason}")]
    Provisioning { worker_id: WorkerId, reason: String },

    #[error("invalid {kind} status: {value}")]
    InvalidStatus { kind: &'static str, value: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
