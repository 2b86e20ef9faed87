//! Boundary to the messaging platform.
//!
//! The engine never speaks the platform protocol. It opens one session per
//! worker and asks it to join targets; every answer is one of the closed set
//! of [`JoinOutcome`] variants, which the join loop switches on exhaustively.

use std::future::Future;

use thiserror::Error;

use crate::link::LinkKind;
use crate::model::Worker;

/// Why the platform considers a target permanently unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadReason {
    /// Malformed or unknown invite hash, username, or folder slug.
    Invalid,
    /// The invite existed but has expired or was revoked.
    Expired,
    /// Private chat the worker has no access to.
    Private,
    /// Nothing exists under this reference.
    NotFound,
}

impl std::fmt::Display for DeadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeadReason::Invalid => "invalid",
            DeadReason::Expired => "expired",
            DeadReason::Private => "private",
            DeadReason::NotFound => "not found",
        })
    }
}

/// Classified result of one join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The worker is already a member; the desired end state holds.
    AlreadyMember,
    /// Back off for this many seconds. Scoped to the worker that asked.
    RateLimited { seconds: u64 },
    /// Permanent failure of the target itself.
    Dead(DeadReason),
    /// Anything else, with the platform's raw detail.
    Failed(String),
}

/// Failure to open a session for a worker.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// The credential was rejected. The worker should be disabled.
    #[error("credential rejected: {0}")]
    Unauthorized(String),

    /// The platform could not be reached or refused for another reason.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Opens authenticated sessions. Shared by every worker loop.
pub trait Platform: Send + Sync + 'static {
    type Session: PlatformSession;

    fn connect(&self, worker: &Worker) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}

/// One worker's authenticated session, owned exclusively by its loop.
pub trait PlatformSession: Send + 'static {
    /// Attempt to join the canonical target. Folders are expanded here.
    fn attempt_join(&mut self, target: &str, kind: LinkKind) -> impl Future<Output = JoinOutcome> + Send;

    /// Release the session.
    fn disconnect(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}
