//! Per-worker join loop.
//!
//! Drives one worker's pending assignments, one at a time, against its
//! platform session and reacts to each classified outcome:
//!
//! | outcome            | assignment            | pause                | reserve          |
//! |--------------------|-----------------------|----------------------|------------------|
//! | joined / member    | success               | join delay           | untouched        |
//! | rate limited (N s) | stays pending, +1 try | N + slack, same item | untouched        |
//! | dead               | failed, target dead   | none                 | one replacement  |
//! | other error        | failed                | none                 | untouched        |

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, error, info, warn};
use uuid::Uuid;

use super::pacer::{Pacer, TokioPacer};
use crate::config::EngineConfig;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::event::Outcome;
use crate::model::{PendingAssignment, Replacement, WorkerId, WorkerStatus, WorkerSummary};
use crate::platform::{ConnectError, JoinOutcome, Platform, PlatformSession};
use crate::telemetry::join::{record_outcome, start_worker_span};
use crate::telemetry::metrics;

/// Timing and batching knobs of a join loop.
#[derive(Debug, Clone)]
pub struct JoinSettings {
    /// Pause after every success.
    pub join_delay: Duration,
    /// Added to every platform-requested backoff.
    pub rate_limit_slack: Duration,
    /// Most pending assignments one run loads.
    pub batch_limit: u64,
    /// Consecutive rate limits on one item before failing it. `None` retries forever.
    pub max_rate_limit_retries: Option<u32>,
}

impl From<&EngineConfig> for JoinSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            join_delay: config.join_delay(),
            rate_limit_slack: config.rate_limit_slack(),
            batch_limit: config.per_worker_cap,
            max_rate_limit_retries: config.max_rate_limit_retries,
        }
    }
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// One worker's sequential join driver.
pub struct JoinLoop<P: Platform, S: Pacer = TokioPacer> {
    db: Arc<Db>,
    platform: Arc<P>,
    pacer: S,
    settings: JoinSettings,
    stop: CancellationToken,
}

impl<P: Platform> JoinLoop<P> {
    pub fn new(db: Arc<Db>, platform: Arc<P>, settings: JoinSettings, stop: CancellationToken) -> Self {
        Self {
            db,
            platform,
            pacer: TokioPacer,
            settings,
            stop,
        }
    }
}

impl<P: Platform, S: Pacer> JoinLoop<P, S> {
    /// Replace the pacer (tests record pauses instead of sleeping).
    pub fn with_pacer<T: Pacer>(self, pacer: T) -> JoinLoop<P, T> {
        JoinLoop {
            db: self.db,
            platform: self.platform,
            pacer,
            settings: self.settings,
            stop: self.stop,
        }
    }

    /// Run the loop for one worker until its pending queue is exhausted or
    /// the stop token fires.
    ///
    /// # Errors
    ///
    /// Fails before touching any assignment if the worker is missing or
    /// disabled, or if the platform refuses a session. A rejected credential
    /// also disables the worker. Store errors abort the loop; everything
    /// committed so far stays committed.
    pub async fn run(&self, worker_id: WorkerId) -> Result<WorkerSummary> {
        self.run_as(worker_id, Uuid::new_v4()).await
    }

    pub(crate) async fn run_as(&self, worker_id: WorkerId, run_id: Uuid) -> Result<WorkerSummary> {
        let span = start_worker_span(worker_id, run_id);
        self.run_in_span(worker_id, &span)
            .instrument(span.clone())
            .await
    }

    async fn run_in_span(&self, worker_id: WorkerId, span: &Span) -> Result<WorkerSummary> {
        let worker = self.db.get_worker(worker_id).await?;
        if !worker.is_active() {
            return Err(Error::WorkerDisabled(worker_id));
        }

        let mut session = match self.platform.connect(&worker).await {
            Ok(session) => session,
            Err(e) => {
                error!(worker_id = %worker_id, "connect failed: {e}");
                if matches!(e, ConnectError::Unauthorized(_)) {
                    self.db
                        .set_worker_status(worker_id, WorkerStatus::Disabled)
                        .await?;
                }
                return Err(Error::Provisioning {
                    worker_id,
                    reason: e.to_string(),
                });
            }
        };

        let result = self.drive(worker_id, &mut session, span).await;
        session.disconnect().await;
        let summary = result?;

        span.record(
            "join.processed",
            summary.success_count + summary.failed_count,
        );
        info!(
            worker_id = %worker_id,
            success = summary.success_count,
            failed = summary.failed_count,
            replaced = summary.replaced_count,
            rate_limited = summary.rate_limited_count,
            stopped = summary.stopped,
            "join loop finished"
        );
        Ok(summary)
    }

    async fn drive(
        &self,
        worker_id: WorkerId,
        session: &mut P::Session,
        span: &Span,
    ) -> Result<WorkerSummary> {
        let mut queue: VecDeque<PendingAssignment> = self
            .db
            .pending_assignments_for(worker_id, self.settings.batch_limit)
            .await?
            .into();
        let mut summary = WorkerSummary::new(worker_id);
        let mut rate_limit_streak = 0u32;

        info!(worker_id = %worker_id, pending = queue.len(), "join loop started");

        while let Some(item) = queue.front().cloned() {
            if self.stop.is_cancelled() {
                summary.stopped = true;
                break;
            }

            let outcome = session.attempt_join(&item.target, item.kind).await;

            match outcome {
                JoinOutcome::Joined | JoinOutcome::AlreadyMember => {
                    let tag = if outcome == JoinOutcome::AlreadyMember {
                        Outcome::AlreadyMember
                    } else {
                        Outcome::Success
                    };
                    queue.pop_front();
                    rate_limit_streak = 0;

                    if !self.db.mark_success(worker_id, item.target_id).await? {
                        warn!(worker_id = %worker_id, link = %item.target, "assignment no longer pending");
                    }
                    self.observe(worker_id, span, &item.target, tag, "").await;
                    summary.success_count += 1;

                    if !self.pause(self.settings.join_delay).await {
                        summary.stopped = true;
                        break;
                    }
                }

                JoinOutcome::RateLimited { seconds } => {
                    rate_limit_streak += 1;
                    let reason = format!("rate limited: retry after {seconds}s");

                    if self
                        .settings
                        .max_rate_limit_retries
                        .is_some_and(|max| rate_limit_streak > max)
                    {
                        queue.pop_front();
                        let detail = format!("{reason}; gave up after {} attempts", rate_limit_streak);
                        rate_limit_streak = 0;
                        self.db.mark_failed(worker_id, item.target_id, &detail).await?;
                        self.observe(worker_id, span, &item.target, Outcome::Failed, &detail)
                            .await;
                        summary.failed_count += 1;
                        continue;
                    }

                    let wait = Duration::from_secs(seconds).saturating_add(self.settings.rate_limit_slack);
                    self.db.bump_attempt(worker_id, item.target_id, &reason).await?;
                    self.observe(
                        worker_id,
                        span,
                        &item.target,
                        Outcome::RateLimited,
                        &format!("{reason}, waiting {}s", wait.as_secs()),
                    )
                    .await;
                    summary.rate_limited_count += 1;
                    metrics::backoff_seconds().record(wait.as_secs_f64(), &[]);
                    warn!(worker_id = %worker_id, wait_secs = wait.as_secs(), "rate limited, backing off");

                    // The same item stays at the front and is retried.
                    if !self.pause(wait).await {
                        summary.stopped = true;
                        break;
                    }
                }

                JoinOutcome::Dead(reason) => {
                    queue.pop_front();
                    rate_limit_streak = 0;
                    let detail = format!("dead: {reason}");

                    let replacement = self
                        .db
                        .replace_dead_assignment(worker_id, item.target_id, &detail)
                        .await?;
                    if replacement == Replacement::NotPending {
                        warn!(worker_id = %worker_id, link = %item.target, "dead target already finished elsewhere, skipped");
                        continue;
                    }

                    self.observe(worker_id, span, &item.target, Outcome::Dead, &detail)
                        .await;
                    summary.failed_count += 1;

                    if let Replacement::Claimed(replacement) = replacement {
                        self.observe(
                            worker_id,
                            span,
                            &replacement.target,
                            Outcome::Replacement,
                            &format!("replaces {}", item.target),
                        )
                        .await;
                        summary.replaced_count += 1;
                        // Attempted next, with no delay.
                        queue.push_front(replacement);
                    } else {
                        warn!(worker_id = %worker_id, link = %item.target, "reserve empty, dead target not replaced");
                        self.observe(worker_id, span, &item.target, Outcome::ReserveEmpty, &detail)
                            .await;
                    }
                }

                JoinOutcome::Failed(detail) => {
                    queue.pop_front();
                    rate_limit_streak = 0;
                    error!(worker_id = %worker_id, link = %item.target, "join failed: {detail}");
                    self.db.mark_failed(worker_id, item.target_id, &detail).await?;
                    self.observe(worker_id, span, &item.target, Outcome::Failed, &detail)
                        .await;
                    summary.failed_count += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Event log, span event, and metric for one observation.
    async fn observe(&self, worker_id: WorkerId, span: &Span, link: &str, outcome: Outcome, detail: &str) {
        metrics::joins().add(1, &[KeyValue::new("outcome", outcome.as_str())]);
        record_outcome(span, link, outcome);
        self.db.log_event(Some(worker_id), link, outcome, detail).await;
    }

    /// Pause unless stopped. Returns false if the stop token fired first.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.stop.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            _ = self.pacer.pause(duration) => true,
        }
    }
}
