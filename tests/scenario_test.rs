//! End to end: ingest, distribute, join.

mod common;

use std::sync::Arc;

use common::{RecordingPacer, ScriptedPlatform, Timeline, add_worker, settings, test_db};
use joinq::distributor::Distributor;
use joinq::engine::JoinSupervisor;
use joinq::event::Outcome;

/// Twelve raw strings: two are alternate spellings of earlier entries and
/// one is not a link at all.
///
/// Ingestion stores only strings the classifier accepts, so the non-link is
/// rejected rather than kept as a target. That leaves nine targets: with a
/// cap of five the first worker is filled and the second gets the last four,
/// and nine joins succeed.
const RAW: [&str; 12] = [
    "https://t.me/alpha",
    "t.me/Alpha",
    "https://t.me/+InviteOne",
    "https://t.me/joinchat/InviteOne",
    "https://t.me/addlist/FolderOne",
    "https://telegram.me/bravo",
    "https://t.me/charlie/15",
    "https://t.me/delta?utm_source=x",
    "https://t.me/+InviteTwo",
    "https://t.me/echo",
    "https://t.me/foxtrot",
    "not a link at all",
];

#[tokio::test]
async fn ingest_distribute_and_join_everything() {
    let db = test_db().await;

    let report = db.ingest_targets(RAW, "scenario").await.unwrap();
    assert_eq!(report.received, 12);
    assert_eq!(report.duplicates, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.added, 9);

    let w1 = add_worker(&db, "one").await;
    let w2 = add_worker(&db, "two").await;
    let distribution = Distributor::new(Arc::clone(&db), 5, 0)
        .distribute()
        .await
        .unwrap();
    assert_eq!(distribution.per_worker[0].worker_id, w1);
    assert_eq!(distribution.per_worker[0].assigned, 5);
    assert_eq!(distribution.per_worker[1].worker_id, w2);
    assert_eq!(distribution.per_worker[1].assigned, 4);
    assert_eq!(distribution.unassigned_after, 0);

    let timeline = Timeline::default();
    let supervisor = JoinSupervisor::new(
        Arc::clone(&db),
        Arc::new(ScriptedPlatform::new(timeline.clone())),
        settings(),
    )
    .with_pacer(RecordingPacer::new(timeline.clone()));
    let run = supervisor.run_all().await.unwrap();
    assert!(run.failures.is_empty());
    assert_eq!(run.total_success(), 9);
    assert_eq!(run.total_failed(), 0);

    let stats = db.statistics().await.unwrap();
    assert_eq!(stats.success, 9);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.assigned, 9);

    let events = db.recent_events(None, 100).await.unwrap();
    assert_eq!(events.len(), 9);
    assert!(events.iter().all(|e| e.outcome == Outcome::Success));

    assert_eq!(db.get_worker(w1).await.unwrap().links_processed, 5);
    assert_eq!(db.get_worker(w2).await.unwrap().links_processed, 4);
}
