//! Shared fixtures: an in-memory store, a scripted platform, and a pacer that
//! records pauses instead of sleeping.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use joinq::config::secrets::{ExposeSecret, SecretString};
use joinq::db::Db;
use joinq::engine::{JoinSettings, Pacer};
use joinq::link::LinkKind;
use joinq::model::{Worker, WorkerId};
use joinq::platform::{ConnectError, JoinOutcome, Platform, PlatformSession};
use tokio_util::sync::CancellationToken;

pub async fn test_db() -> Arc<Db> {
    Arc::new(Db::in_memory().await.expect("failed to open in-memory db"))
}

/// Register a worker whose credential is derived from its label.
pub async fn add_worker(db: &Db, label: &str) -> WorkerId {
    db.add_worker(&credential_for(label), label)
        .await
        .unwrap()
        .expect("credential should be new")
}

pub fn credential_for(label: &str) -> SecretString {
    SecretString::from(format!("session-{label}"))
}

/// `count` distinct username links, in order.
pub fn links(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://t.me/{prefix}_{i:03}"))
        .collect()
}

pub fn settings() -> JoinSettings {
    JoinSettings {
        join_delay: Duration::from_secs(90),
        rate_limit_slack: Duration::from_secs(5),
        batch_limit: 1000,
        max_rate_limit_retries: None,
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Attempt { worker: WorkerId, target: String },
    Pause(Duration),
}

/// Ordered record of attempts and pauses across platform and pacer.
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<Step>>>);

impl Timeline {
    pub fn push(&self, step: Step) {
        self.0.lock().unwrap().push(step);
    }

    pub fn steps(&self) -> Vec<Step> {
        self.0.lock().unwrap().clone()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.steps()
            .into_iter()
            .filter_map(|s| match s {
                Step::Pause(d) => Some(d),
                Step::Attempt { .. } => None,
            })
            .collect()
    }

    pub fn attempts(&self) -> Vec<String> {
        self.steps()
            .into_iter()
            .filter_map(|s| match s {
                Step::Attempt { target, .. } => Some(target),
                Step::Pause(_) => None,
            })
            .collect()
    }

    pub fn attempts_by(&self, worker: WorkerId) -> Vec<String> {
        self.steps()
            .into_iter()
            .filter_map(|s| match s {
                Step::Attempt { worker: w, target } if w == worker => Some(target),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Pacer
// ---------------------------------------------------------------------------

/// Records each requested pause. By default the pause returns at once.
#[derive(Clone)]
pub struct RecordingPacer {
    timeline: Timeline,
    mode: PaceMode,
}

#[derive(Clone)]
enum PaceMode {
    Return,
    /// The first pause fires this token and never completes.
    StopOnPause(CancellationToken),
    /// Every pause lasts until the loop is stopped.
    Hold,
}

impl RecordingPacer {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            mode: PaceMode::Return,
        }
    }

    /// Stops the loop in the middle of its first delay.
    pub fn stopping(timeline: Timeline, token: CancellationToken) -> Self {
        Self {
            timeline,
            mode: PaceMode::StopOnPause(token),
        }
    }

    /// Parks the loop in its first delay until someone stops it.
    pub fn holding(timeline: Timeline) -> Self {
        Self {
            timeline,
            mode: PaceMode::Hold,
        }
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        let timeline = self.timeline.clone();
        let mode = self.mode.clone();
        async move {
            timeline.push(Step::Pause(duration));
            match mode {
                PaceMode::Return => {}
                PaceMode::StopOnPause(token) => {
                    token.cancel();
                    std::future::pending::<()>().await;
                }
                PaceMode::Hold => std::future::pending::<()>().await,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    outcomes: HashMap<String, VecDeque<JoinOutcome>>,
    rejected: HashSet<String>,
    unavailable: HashSet<String>,
    disconnects: usize,
}

/// Platform whose join outcomes are scripted per canonical target. Targets
/// without a script (or whose script ran out) join successfully.
#[derive(Clone, Default)]
pub struct ScriptedPlatform {
    script: Arc<Mutex<Script>>,
    timeline: Timeline,
}

impl ScriptedPlatform {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            script: Arc::default(),
            timeline,
        }
    }

    pub fn script(&self, target: &str, outcomes: impl IntoIterator<Item = JoinOutcome>) {
        self.script
            .lock()
            .unwrap()
            .outcomes
            .entry(target.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn reject_credential(&self, credential: &SecretString) {
        self.script
            .lock()
            .unwrap()
            .rejected
            .insert(credential.expose_secret().to_string());
    }

    pub fn make_unavailable(&self, credential: &SecretString) {
        self.script
            .lock()
            .unwrap()
            .unavailable
            .insert(credential.expose_secret().to_string());
    }

    pub fn disconnects(&self) -> usize {
        self.script.lock().unwrap().disconnects
    }
}

pub struct ScriptedSession {
    worker: WorkerId,
    script: Arc<Mutex<Script>>,
    timeline: Timeline,
}

impl Platform for ScriptedPlatform {
    type Session = ScriptedSession;

    async fn connect(&self, worker: &Worker) -> Result<ScriptedSession, ConnectError> {
        let credential = worker.credential.expose_secret().to_string();
        {
            let script = self.script.lock().unwrap();
            if script.rejected.contains(&credential) {
                return Err(ConnectError::Unauthorized("session revoked".to_string()));
            }
            if script.unavailable.contains(&credential) {
                return Err(ConnectError::Unavailable("connection reset".to_string()));
            }
        }
        Ok(ScriptedSession {
            worker: worker.id,
            script: Arc::clone(&self.script),
            timeline: self.timeline.clone(),
        })
    }
}

impl PlatformSession for ScriptedSession {
    async fn attempt_join(&mut self, target: &str, _kind: LinkKind) -> JoinOutcome {
        self.timeline.push(Step::Attempt {
            worker: self.worker,
            target: target.to_string(),
        });
        self.script
            .lock()
            .unwrap()
            .outcomes
            .get_mut(target)
            .and_then(VecDeque::pop_front)
            .unwrap_or(JoinOutcome::Joined)
    }

    async fn disconnect(self) {
        self.script.lock().unwrap().disconnects += 1;
    }
}
