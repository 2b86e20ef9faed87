//! Integration tests for distribution and worker estimates.

mod common;

use std::sync::Arc;

use common::{add_worker, links, test_db};
use joinq::config::EngineConfig;
use joinq::distributor::Distributor;
use joinq::error::Error;
use joinq::model::{WorkerAllocation, WorkerStatus};

#[tokio::test]
async fn fills_workers_first_come_first_served() {
    let db = test_db().await;
    let w1 = add_worker(&db, "one").await;
    let w2 = add_worker(&db, "two").await;
    let w3 = add_worker(&db, "three").await;
    db.add_targets(links("chan", 25), "test").await.unwrap();

    let report = Distributor::new(Arc::clone(&db), 10, 3)
        .distribute()
        .await
        .unwrap();

    assert_eq!(report.workers, 3);
    assert_eq!(report.unassigned_before, 25);
    assert_eq!(report.distributable, 22);
    assert_eq!(
        report.per_worker,
        vec![
            WorkerAllocation { worker_id: w1, assigned: 10 },
            WorkerAllocation { worker_id: w2, assigned: 10 },
            WorkerAllocation { worker_id: w3, assigned: 2 },
        ]
    );
    assert_eq!(report.assigned_total, 22);
    assert_eq!(report.reserve_remaining(), 3);

    // Oldest targets go to the lowest worker id.
    let first: Vec<String> = db
        .pending_assignments_for(w1, 100)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.target)
        .collect();
    assert_eq!(first, links("chan", 10));
}

#[tokio::test]
async fn short_supply_still_reports_every_active_worker() {
    let db = test_db().await;
    let w1 = add_worker(&db, "one").await;
    let w2 = add_worker(&db, "two").await;
    let w3 = add_worker(&db, "three").await;
    db.add_targets(links("chan", 4), "test").await.unwrap();

    let report = Distributor::new(Arc::clone(&db), 5, 0)
        .distribute()
        .await
        .unwrap();

    assert_eq!(report.workers, 3);
    assert_eq!(
        report.per_worker,
        vec![
            WorkerAllocation { worker_id: w1, assigned: 4 },
            WorkerAllocation { worker_id: w2, assigned: 0 },
            WorkerAllocation { worker_id: w3, assigned: 0 },
        ]
    );
    assert_eq!(report.assigned_total, 4);
    assert!(db.assignments_for(w2).await.unwrap().is_empty());
    assert!(db.assignments_for(w3).await.unwrap().is_empty());
}

#[tokio::test]
async fn reserve_floor_is_never_dipped_into() {
    let db = test_db().await;
    let only = add_worker(&db, "one").await;
    db.add_targets(links("chan", 8), "test").await.unwrap();

    let distributor = Distributor::new(Arc::clone(&db), 100, 5);
    let report = distributor.distribute().await.unwrap();
    assert_eq!(report.assigned_total, 3);
    assert_eq!(report.unassigned_after, 5);

    // A second pass finds nothing above the floor.
    let again = distributor.distribute().await.unwrap();
    assert_eq!(again.distributable, 0);
    assert_eq!(again.assigned_total, 0);
    assert_eq!(again.per_worker, vec![WorkerAllocation { worker_id: only, assigned: 0 }]);
    assert_eq!(db.count_unassigned_active().await.unwrap(), 5);
}

#[tokio::test]
async fn backlog_below_the_floor_assigns_nothing() {
    let db = test_db().await;
    add_worker(&db, "one").await;
    db.add_targets(links("chan", 4), "test").await.unwrap();

    let report = Distributor::new(Arc::clone(&db), 100, 500)
        .distribute()
        .await
        .unwrap();
    assert_eq!(report.distributable, 0);
    assert_eq!(report.unassigned_after, 4);
    assert!(report.unassigned_after >= report.reserve_floor.min(report.unassigned_before));
}

#[tokio::test]
async fn disabled_workers_receive_nothing() {
    let db = test_db().await;
    let off = add_worker(&db, "off").await;
    let on = add_worker(&db, "on").await;
    db.set_worker_status(off, WorkerStatus::Disabled).await.unwrap();
    db.add_targets(links("chan", 4), "test").await.unwrap();

    let report = Distributor::new(Arc::clone(&db), 10, 0)
        .distribute()
        .await
        .unwrap();
    assert_eq!(
        report.per_worker,
        vec![WorkerAllocation { worker_id: on, assigned: 4 }]
    );
    assert!(db.assignments_for(off).await.unwrap().is_empty());
}

#[tokio::test]
async fn distribution_without_workers_fails() {
    let db = test_db().await;
    db.add_targets(links("chan", 4), "test").await.unwrap();

    let result = Distributor::new(Arc::clone(&db), 10, 0).distribute().await;
    assert!(matches!(result, Err(Error::NoWorkers)));
    assert_eq!(db.count_unassigned_active().await.unwrap(), 4);
}

#[tokio::test]
async fn estimate_reports_workers_needed() {
    let db = test_db().await;
    add_worker(&db, "one").await;
    db.add_targets(links("chan", 27), "test").await.unwrap();

    let config = EngineConfig {
        per_worker_cap: 10,
        reserve_floor: 5,
        ..EngineConfig::default()
    };
    let estimate = Distributor::from_config(Arc::clone(&db), &config)
        .estimate()
        .await
        .unwrap();

    assert_eq!(estimate.unassigned, 27);
    assert_eq!(estimate.distributable, 22);
    assert_eq!(estimate.active_workers, 1);
    assert_eq!(estimate.needed_workers, 3);
    // Estimating changes nothing.
    assert_eq!(db.count_unassigned_active().await.unwrap(), 27);
}
