//! Join loop span helpers.

use tracing::Span;
use uuid::Uuid;

use crate::event::Outcome;
use crate::model::WorkerId;

/// Start the span that wraps one worker's join loop.
///
/// `join.processed` is declared empty and filled when the loop ends.
pub fn start_worker_span(worker_id: WorkerId, run_id: Uuid) -> Span {
    tracing::info_span!(
        "join.worker",
        "join.worker_id" = %worker_id,
        "join.run_id" = %run_id,
        "join.processed" = tracing::field::Empty,
    )
}

/// Record one classified join outcome on the given span.
pub fn record_outcome(span: &Span, link: &str, outcome: Outcome) {
    span.in_scope(|| {
        tracing::info!(link, outcome = outcome.as_str(), "join_outcome");
    });
}
