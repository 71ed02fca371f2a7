//! Poll scheduler behavior against the sqlite backend.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use cargotrack::config::SchedulerConfig;
use cargotrack::domain::{ShipmentStatus, SourceType};
use cargotrack::scheduler::PollScheduler;
use cargotrack::storage::ShipmentStore;

use common::{canonical, insert_shipment, wired, ScriptAdapter};

fn config() -> SchedulerConfig {
    SchedulerConfig {
        interval_minutes: 1,
        batch_size: 100,
        per_source_concurrency: 2,
        fetch_deadline_secs: 5,
    }
}

#[tokio::test]
async fn test_tick_fetches_applies_and_stamps() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;

    let adapter = ScriptAdapter::returning(vec![canonical(
        "CARGO_COLLECTED",
        "2025-08-05T10:00:00Z",
        "SIN",
    )]);
    let scheduler = PollScheduler::new(
        wired.store.clone(),
        vec![adapter.clone()],
        wired.pipeline.clone(),
        config(),
    );

    let summary = scheduler.run_tick().await;
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.events_created, 1);
    assert_eq!(adapter.calls(), 1);

    let refreshed = wired
        .store
        .shipment(shipment.shipment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.current_status, ShipmentStatus::Booked);
    assert!(refreshed.last_tracked_at.is_some());

    // Within the frequency window nothing is due; refetching later only
    // produces duplicates.
    assert_eq!(scheduler.run_tick().await.selected, 0);
}

#[tokio::test]
async fn test_delivered_shipment_stays_quiescent() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;

    wired
        .pipeline
        .apply(
            shipment.shipment_id,
            canonical("DELIVERED", "2025-08-07T12:00:00Z", "HKG"),
            SourceType::Manual,
        )
        .await
        .unwrap();

    let adapter = ScriptAdapter::returning(vec![]);
    let scheduler = PollScheduler::new(
        wired.store.clone(),
        vec![adapter.clone()],
        wired.pipeline.clone(),
        config(),
    );

    // Ten frequency windows later the shipment is still never selected.
    for _ in 0..10 {
        assert_eq!(scheduler.run_tick().await.selected, 0);
    }
    assert_eq!(adapter.calls(), 0);

    let after = wired
        .store
        .shipment(shipment.shipment_id)
        .await
        .unwrap()
        .unwrap();
    assert!(after.last_tracked_at.is_none(), "cursor must never move");

    // The store-level due query agrees, however far time advances.
    let far_future = Utc::now() + Duration::days(365);
    let due = wired.store.due_for_poll(far_future, 100).await.unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn test_frequency_window_controls_dueness() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;

    let now = Utc::now();
    wired
        .store
        .touch_last_tracked(&[shipment.shipment_id], now)
        .await
        .unwrap();

    // 59 minutes in: not due at a 60-minute frequency.
    let due = wired
        .store
        .due_for_poll(now + Duration::minutes(59), 100)
        .await
        .unwrap();
    assert!(due.is_empty());

    // 61 minutes in: due again.
    let due = wired
        .store
        .due_for_poll(now + Duration::minutes(61), 100)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].shipment_id, shipment.shipment_id);
}

#[tokio::test]
async fn test_batch_bound_with_never_tracked_first() {
    let wired = wired().await;
    let first = insert_shipment(wired.store.as_ref(), "125-00000001", Uuid::new_v4()).await;
    let second = insert_shipment(wired.store.as_ref(), "125-00000002", Uuid::new_v4()).await;

    // One shipment was tracked long ago; the other never.
    wired
        .store
        .touch_last_tracked(&[first.shipment_id], Utc::now() - Duration::days(1))
        .await
        .unwrap();

    let due = wired.store.due_for_poll(Utc::now(), 1).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(
        due[0].shipment_id, second.shipment_id,
        "never-tracked shipments go first"
    );

    let scheduler = PollScheduler::new(
        wired.store.clone(),
        vec![Arc::new(cargotrack::adapters::CarrierAdapter::default())
            as Arc<dyn cargotrack::adapters::SourceAdapter>],
        wired.pipeline.clone(),
        SchedulerConfig {
            batch_size: 1,
            ..config()
        },
    );

    assert_eq!(scheduler.run_tick().await.selected, 1);
    assert_eq!(scheduler.run_tick().await.selected, 1);
    assert_eq!(scheduler.run_tick().await.selected, 0);
}
