//! Core data model.
//!
//! A worker is one authenticated identity that performs joins. A target is one
//! canonical join reference. An assignment binds a target to a worker, at most
//! once for the target's lifetime.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::link::LinkKind;

/// Maximum stored length (in characters) of error and detail text.
pub const MAX_DETAIL_CHARS: usize = 1000;

/// Truncate detail text on a char boundary so verbose platform errors
/// cannot grow the store without bound.
pub fn truncate_detail(text: &str) -> &str {
    match text.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Row id of a worker. Ascending order decides who is filled first.
    WorkerId
);
row_id!(
    /// Row id of a target. Ascending order is insertion order.
    TargetId
);
row_id!(AssignmentId);

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidStatus {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

status_enum!(
    /// Lifecycle of a worker. Workers are soft-disabled, never deleted.
    WorkerStatus, "worker" {
        Active => "active",
        Disabled => "disabled",
    }
);

status_enum!(
    /// A target goes `dead` only when a join reports a permanent failure.
    TargetStatus, "target" {
        Active => "active",
        Dead => "dead",
    }
);

status_enum!(
    /// `pending → {success, failed}`. Rate limiting keeps an assignment pending.
    AssignmentStatus, "assignment" {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
    }
);

impl AssignmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AssignmentStatus::Success | AssignmentStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One authenticated identity capable of performing joins.
#[derive(Debug, Serialize)]
pub struct Worker {
    pub id: WorkerId,
    /// Opaque session credential handed to the platform on connect.
    #[serde(skip_serializing)]
    pub credential: SecretString,
    /// Free-form operator label (typically a phone number).
    pub label: String,
    pub status: WorkerStatus,
    /// Assignments this worker has driven to a terminal status.
    pub links_processed: i64,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    pub fn is_active(&self) -> bool {
        self.status == WorkerStatus::Active
    }
}

/// One canonical join reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    /// Canonical normalized link. Unique across the store.
    pub link: String,
    pub kind: LinkKind,
    /// Where the target was ingested from (e.g. a source channel).
    pub source: String,
    pub status: TargetStatus,
    pub created_at: DateTime<Utc>,
}

/// Binding of one target to one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub target_id: TargetId,
    pub worker_id: WorkerId,
    pub status: AssignmentStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A pending assignment as the join loop consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAssignment {
    pub assignment_id: AssignmentId,
    pub target_id: TargetId,
    /// Canonical link text of the target.
    pub target: String,
    pub kind: LinkKind,
    pub attempts: u32,
}

/// Result of retiring a dead target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Target retired; this reserve target now belongs to the same worker.
    Claimed(PendingAssignment),
    /// Target retired; nothing left in the reserve.
    ReserveEmpty,
    /// The assignment had already left `pending`. Nothing changed.
    NotPending,
}

/// Immutable audit record of one join-loop observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub worker_id: Option<WorkerId>,
    pub target: String,
    pub outcome: crate::event::Outcome,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Aggregate counts, always computed from committed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Active workers.
    pub workers: u64,
    pub total_targets: u64,
    /// Targets that have an assignment.
    pub assigned: u64,
    /// Targets with no assignment.
    pub unassigned: u64,
    /// Active targets with no assignment (the reserve pool).
    pub reserve: u64,
    pub dead: u64,
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}

/// What happened to a batch of raw strings handed to ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: u64,
    /// Genuinely new target rows.
    pub added: u64,
    /// Repeats within the batch or of existing rows.
    pub duplicates: u64,
    /// Strings the link classifier rejected.
    pub rejected: u64,
}

/// Per-worker share of one distribution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAllocation {
    pub worker_id: WorkerId,
    pub assigned: u64,
}

/// Result of [`crate::distributor::Distributor::distribute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub workers: u64,
    pub unassigned_before: u64,
    pub unassigned_after: u64,
    pub reserve_floor: u64,
    pub distributable: u64,
    pub assigned_total: u64,
    pub per_worker: Vec<WorkerAllocation>,
}

impl DistributionReport {
    /// Reserve left untouched after the pass.
    pub fn reserve_remaining(&self) -> u64 {
        self.unassigned_after
    }
}

/// Result of [`crate::distributor::Distributor::estimate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEstimate {
    pub unassigned: u64,
    pub reserve_floor: u64,
    pub distributable: u64,
    pub per_worker_cap: u64,
    pub active_workers: u64,
    /// Minimum worker count to absorb the distributable backlog in one pass.
    pub needed_workers: u64,
}

/// Outcome of one worker's join loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub success_count: u64,
    pub failed_count: u64,
    /// Dead targets swapped for a reserve target.
    pub replaced_count: u64,
    /// Rate-limit backoffs taken.
    pub rate_limited_count: u64,
    /// The loop ended on the stop signal rather than an empty queue.
    pub stopped: bool,
}

impl WorkerSummary {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            success_count: 0,
            failed_count: 0,
            replaced_count: 0,
            rate_limited_count: 0,
            stopped: false,
        }
    }
}
