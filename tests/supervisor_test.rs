//! Integration tests for the join supervisor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingPacer, ScriptedPlatform, Timeline, add_worker, credential_for, links, settings, test_db};
use joinq::distributor::Distributor;
use joinq::engine::JoinSupervisor;
use joinq::error::Error;
use joinq::model::WorkerStatus;

/// Wait until the timeline shows `n` pauses.
async fn until_paused(timeline: &Timeline, n: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while timeline.pauses().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("loops did not reach their first pause");
}

#[tokio::test]
async fn runs_every_active_worker_to_completion() {
    let db = test_db().await;
    let w1 = add_worker(&db, "one").await;
    let w2 = add_worker(&db, "two").await;
    let off = add_worker(&db, "off").await;
    db.set_worker_status(off, WorkerStatus::Disabled).await.unwrap();
    db.add_targets(links("chan", 6), "test").await.unwrap();
    Distributor::new(Arc::clone(&db), 3, 0)
        .distribute()
        .await
        .unwrap();

    let timeline = Timeline::default();
    let supervisor = JoinSupervisor::new(
        Arc::clone(&db),
        Arc::new(ScriptedPlatform::new(timeline.clone())),
        settings(),
    )
    .with_pacer(RecordingPacer::new(timeline.clone()));

    let report = supervisor.run_all().await.unwrap();

    assert_eq!(report.run_id, supervisor.run_id());
    assert!(report.failures.is_empty());
    let ids: Vec<_> = report.summaries.iter().map(|s| s.worker_id).collect();
    assert_eq!(ids, vec![w1, w2]);
    assert_eq!(report.total_success(), 6);
    assert_eq!(timeline.attempts_by(w1), links("chan", 6)[..3].to_vec());
    assert_eq!(timeline.attempts_by(w2), links("chan", 6)[3..].to_vec());
    assert!(timeline.attempts_by(off).is_empty());
}

#[tokio::test]
async fn one_worker_failing_does_not_affect_the_others() {
    let db = test_db().await;
    let good = add_worker(&db, "good").await;
    let bad = add_worker(&db, "bad").await;
    db.add_targets(links("chan", 4), "test").await.unwrap();
    Distributor::new(Arc::clone(&db), 2, 0)
        .distribute()
        .await
        .unwrap();

    let timeline = Timeline::default();
    let platform = ScriptedPlatform::new(timeline.clone());
    platform.reject_credential(&credential_for("bad"));
    let supervisor = JoinSupervisor::new(Arc::clone(&db), Arc::new(platform), settings())
        .with_pacer(RecordingPacer::new(timeline.clone()));

    let report = supervisor.run_all().await.unwrap();

    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].worker_id, good);
    assert_eq!(report.summaries[0].success_count, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].worker_id, bad);
    assert_eq!(db.get_worker(bad).await.unwrap().status, WorkerStatus::Disabled);
    assert_eq!(db.pending_assignments_for(bad, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn workers_can_be_stopped_individually_or_together() {
    let db = test_db().await;
    let w1 = add_worker(&db, "one").await;
    let w2 = add_worker(&db, "two").await;
    db.add_targets(links("chan", 4), "test").await.unwrap();
    Distributor::new(Arc::clone(&db), 2, 0)
        .distribute()
        .await
        .unwrap();

    let timeline = Timeline::default();
    let supervisor = JoinSupervisor::new(
        Arc::clone(&db),
        Arc::new(ScriptedPlatform::new(timeline.clone())),
        settings(),
    )
    .with_pacer(RecordingPacer::holding(timeline.clone()));

    assert_eq!(supervisor.start_all().await.unwrap(), 2);
    assert!(!supervisor.start_worker(w1), "already running");
    until_paused(&timeline, 2).await;

    assert!(supervisor.stop_worker(w1));
    tokio::time::timeout(Duration::from_secs(10), async {
        while supervisor.is_running(w1) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stopped worker should finish");
    assert!(supervisor.is_running(w2));

    supervisor.stop_all();
    let report = supervisor.wait().await;

    assert_eq!(report.summaries.len(), 2);
    for summary in &report.summaries {
        assert!(summary.stopped);
        assert_eq!(summary.success_count, 1);
    }
    assert_eq!(db.statistics().await.unwrap().pending, 2);
}

#[tokio::test]
async fn nothing_to_start_without_active_workers() {
    let db = test_db().await;
    let only = add_worker(&db, "only").await;
    db.set_worker_status(only, WorkerStatus::Disabled).await.unwrap();

    let supervisor = JoinSupervisor::new(
        Arc::clone(&db),
        Arc::new(ScriptedPlatform::default()),
        settings(),
    );
    assert!(matches!(supervisor.start_all().await, Err(Error::NoWorkers)));
    assert!(!supervisor.stop_worker(only));
    assert!(supervisor.wait().await.summaries.is_empty());
}
