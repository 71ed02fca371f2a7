//! End-to-end pipeline scenarios against the sqlite backend.
//!
//! Covers create-apply-derive, the dedup window, out-of-order tolerance,
//! and the idempotence/permutation properties of state derivation.

mod common;

use chrono::Duration;
use uuid::Uuid;

use cargotrack::domain::{ShipmentStatus, SourceType};
use cargotrack::pipeline::ApplyOutcome;
use cargotrack::storage::{EventFilter, EventStore, Page, ShipmentStore};

use common::{at, canonical, insert_shipment, wired};

#[tokio::test]
async fn test_create_apply_derive() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;

    let outcome = wired
        .pipeline
        .apply(
            shipment.shipment_id,
            canonical("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN"),
            SourceType::Manual,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Created { .. }));

    let refreshed = wired
        .store
        .shipment(shipment.shipment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.current_status, ShipmentStatus::Booked);
    assert_eq!(refreshed.current_location.as_deref(), Some("SIN"));
    assert!(refreshed.delivery_date.is_none());

    let events = wired
        .store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter::default(),
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_milestone);
    assert_eq!(events[0].original_timezone, "UTC");
}

#[tokio::test]
async fn test_dedup_within_five_minutes() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;

    wired
        .pipeline
        .apply(
            shipment.shipment_id,
            canonical("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN"),
            SourceType::Manual,
        )
        .await
        .unwrap();

    let outcome = wired
        .pipeline
        .apply(
            shipment.shipment_id,
            canonical("CARGO_COLLECTED", "2025-08-05T10:04:59Z", "SIN"),
            SourceType::Manual,
        )
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Duplicate);

    assert_eq!(
        wired.store.event_count(shipment.shipment_id).await.unwrap(),
        1
    );
    let refreshed = wired
        .store
        .shipment(shipment.shipment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.current_status, ShipmentStatus::Booked);
}

#[tokio::test]
async fn test_out_of_order_delivery() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let id = shipment.shipment_id;

    for (code, datetime, airport) in [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN"),
        ("DELIVERED", "2025-08-07T12:00:00Z", "HKG"),
        // Historically older than the delivery, applied after it.
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN"),
    ] {
        let outcome = wired
            .pipeline
            .apply(id, canonical(code, datetime, airport), SourceType::Manual)
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Created { .. }));
    }

    let refreshed = wired.store.shipment(id).await.unwrap().unwrap();
    assert_eq!(refreshed.current_status, ShipmentStatus::Delivered);
    assert_eq!(refreshed.delivery_date, Some(at("2025-08-07T12:00:00Z")));
    assert_eq!(refreshed.current_location.as_deref(), Some("HKG"));
    assert!(refreshed.is_quiescent());
    assert!(refreshed.estimated_delivery_date.is_none());
    assert_eq!(wired.store.event_count(id).await.unwrap(), 3);

    // Quiescent shipments leave the due set for good.
    let due = wired
        .store
        .due_for_poll(at("2025-08-07T12:00:00Z") + Duration::days(30), 100)
        .await
        .unwrap();
    assert!(due.iter().all(|s| s.shipment_id != id));
}

#[tokio::test]
async fn test_dedup_idempotence_property() {
    // A sequence with repetitions produces the same event count and
    // derived state as its deduplicated form.
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let id = shipment.shipment_id;

    let applies = [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN"),
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN"),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN"),
        ("CARGO_COLLECTED", "2025-08-05T10:01:30Z", "SIN"),
        ("FLIGHT_DEPARTED", "2025-08-05T14:04:00Z", "SIN"),
        ("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", "HKG"),
        ("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", "HKG"),
    ];

    let mut created = 0;
    let mut duplicates = 0;
    for (code, datetime, airport) in applies {
        match wired
            .pipeline
            .apply(id, canonical(code, datetime, airport), SourceType::Manual)
            .await
            .unwrap()
        {
            ApplyOutcome::Created { .. } => created += 1,
            ApplyOutcome::Duplicate => duplicates += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(created, 3);
    assert_eq!(duplicates, 4);
    assert_eq!(wired.store.event_count(id).await.unwrap(), 3);

    let refreshed = wired.store.shipment(id).await.unwrap().unwrap();
    assert_eq!(refreshed.current_status, ShipmentStatus::Arrived);
}

#[tokio::test]
async fn test_monotonic_append_tracks_latest_status() {
    let wired = wired().await;
    let shipment = insert_shipment(wired.store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let id = shipment.shipment_id;

    let journey = [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z", ShipmentStatus::Booked),
        ("MANIFESTED", "2025-08-05T12:00:00Z", ShipmentStatus::Manifested),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", ShipmentStatus::Departed),
        ("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", ShipmentStatus::Arrived),
        ("OUT_FOR_DELIVERY", "2025-08-07T09:00:00Z", ShipmentStatus::OutForDelivery),
        ("DELIVERED", "2025-08-07T12:00:00Z", ShipmentStatus::Delivered),
    ];

    for (code, datetime, expected) in journey {
        wired
            .pipeline
            .apply(id, canonical(code, datetime, "SIN"), SourceType::Manual)
            .await
            .unwrap();
        let refreshed = wired.store.shipment(id).await.unwrap().unwrap();
        assert_eq!(refreshed.current_status, expected, "after {code}");
    }
}

#[tokio::test]
async fn test_permutation_invariance_property() {
    // Any arrival order of a fixed multiset of events must end in the
    // same derived state.
    let events = [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN"),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN"),
        ("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", "HKG"),
        ("DELIVERED", "2025-08-07T12:00:00Z", "HKG"),
    ];
    let permutations = [
        [0usize, 1, 2, 3],
        [3, 2, 1, 0],
        [2, 0, 3, 1],
        [1, 3, 0, 2],
    ];

    let mut outcomes = Vec::new();
    for (n, permutation) in permutations.iter().enumerate() {
        let wired = wired().await;
        let shipment = insert_shipment(
            wired.store.as_ref(),
            &format!("125-1234567{n}"),
            Uuid::new_v4(),
        )
        .await;

        for &index in permutation {
            let (code, datetime, airport) = events[index];
            wired
                .pipeline
                .apply(
                    shipment.shipment_id,
                    canonical(code, datetime, airport),
                    SourceType::Manual,
                )
                .await
                .unwrap();
        }

        let refreshed = wired
            .store
            .shipment(shipment.shipment_id)
            .await
            .unwrap()
            .unwrap();
        outcomes.push((
            refreshed.current_status,
            refreshed.current_location,
            refreshed.delivery_date,
        ));
    }

    for outcome in &outcomes[1..] {
        assert_eq!(outcome, &outcomes[0]);
    }
    assert_eq!(outcomes[0].0, ShipmentStatus::Delivered);
    assert_eq!(outcomes[0].1.as_deref(), Some("HKG"));
    assert_eq!(outcomes[0].2, Some(at("2025-08-07T12:00:00Z")));
}
