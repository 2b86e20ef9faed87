//! Outcome tags written to the append-only event log.
//!
//! The event log is the join loop's audit trail. Nothing reads it back to
//! make decisions; it exists for reporting only.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// What one join-loop step observed for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Joined the target.
    Success,
    /// The worker was already a member. Counts as success.
    AlreadyMember,
    /// The platform asked this worker to back off. The item stays pending.
    RateLimited,
    /// The target is permanently unusable.
    Dead,
    /// A reserve target was bound in place of a dead one.
    Replacement,
    /// A dead target could not be replaced because the reserve is empty.
    ReserveEmpty,
    /// Any other error. Terminal for the assignment.
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::AlreadyMember => "already_member",
            Outcome::RateLimited => "rate_limited",
            Outcome::Dead => "dead",
            Outcome::Replacement => "replacement",
            Outcome::ReserveEmpty => "reserve_empty",
            Outcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "success" => Outcome::Success,
            "already_member" => Outcome::AlreadyMember,
            "rate_limited" => Outcome::RateLimited,
            "dead" => Outcome::Dead,
            "replacement" => Outcome::Replacement,
            "reserve_empty" => Outcome::ReserveEmpty,
            "failed" => Outcome::Failed,
            other => {
                return Err(Error::InvalidStatus {
                    kind: "event outcome",
                    value: other.to_string(),
                });
            }
        })
    }
}
