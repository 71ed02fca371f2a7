//! SQLite storage integration tests.
//!
//! Uses an in-memory database; no external dependencies required.

mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use cargotrack::domain::{
    DeliveryMethod, EventCategory, NewSubscription, ShipmentStatus, SourceType,
};
use cargotrack::storage::{
    CommitOutcome, EventFilter, EventStore, Page, ShipmentStore, SourceStore, SubscriptionStore,
    TrackingStore,
};

use common::{at, canonical, insert_shipment, sqlite_store};

#[tokio::test]
async fn test_schema_init_is_idempotent_and_seeded() {
    let store = sqlite_store().await;
    // Second run must not fail or duplicate reference rows.
    store.ensure_schema().await.unwrap();

    let sources = store.sources().await.unwrap();
    assert_eq!(sources.len(), 5);
    let feed = store
        .source_by_type(SourceType::IndustryFeed)
        .await
        .unwrap()
        .unwrap();
    let manual = store
        .source_by_type(SourceType::Manual)
        .await
        .unwrap()
        .unwrap();
    assert!(feed.priority < manual.priority);

    let milestones = store.milestones().await.unwrap();
    assert!(milestones.iter().any(|m| m.code == "SHIPMENT_CREATED"));
    assert!(milestones.iter().any(|m| m.code == "DELIVERED"));
}

#[tokio::test]
async fn test_shipment_round_trip_and_awb_uniqueness() {
    let store = sqlite_store().await;
    let customer = Uuid::new_v4();
    let shipment = insert_shipment(store.as_ref(), "125-12345678", customer).await;

    let by_id = store.shipment(shipment.shipment_id).await.unwrap().unwrap();
    assert_eq!(by_id.shipment_id, shipment.shipment_id);
    assert_eq!(by_id.awb, shipment.awb);
    assert_eq!(by_id.current_status, ShipmentStatus::Created);
    assert_eq!(by_id.pieces, 2);
    assert!(by_id.tracking_enabled);

    let by_awb = store
        .shipment_by_awb(&shipment.awb)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_awb.shipment_id, shipment.shipment_id);

    // The unique index refuses a second shipment on the same AWB.
    let again = common::shipment_request("125-12345678", customer).into_shipment(Utc::now());
    assert!(store.insert_shipment(&again).await.is_err());

    assert_eq!(store.customer_shipment_count(customer).await.unwrap(), 1);
}

#[tokio::test]
async fn test_commit_applied_transaction() {
    let store = sqlite_store().await;
    let shipment = insert_shipment(store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let source = store
        .source_by_type(SourceType::Manual)
        .await
        .unwrap()
        .unwrap();

    let event = canonical("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN").into_event(
        shipment.shipment_id,
        source.source_id,
        Utc::now(),
    );

    match store.commit_applied(&event).await.unwrap() {
        CommitOutcome::Committed(updated) => {
            assert_eq!(updated.current_status, ShipmentStatus::Booked);
            assert_eq!(updated.current_location.as_deref(), Some("SIN"));
        }
        CommitOutcome::Duplicate => panic!("first apply cannot be a duplicate"),
    }

    // Same logical event inside the window: caught inside the
    // transaction even without the advisory probe.
    let duplicate = canonical("CARGO_COLLECTED", "2025-08-05T10:03:00Z", "SIN").into_event(
        shipment.shipment_id,
        source.source_id,
        Utc::now(),
    );
    assert!(matches!(
        store.commit_applied(&duplicate).await.unwrap(),
        CommitOutcome::Duplicate
    ));
    assert_eq!(store.event_count(shipment.shipment_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_event_filters_and_pagination() {
    let store = sqlite_store().await;
    let shipment = insert_shipment(store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let source = store
        .source_by_type(SourceType::Manual)
        .await
        .unwrap()
        .unwrap();

    let fixtures = [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z", true),
        ("LOCATION_UPDATE", "2025-08-05T12:00:00Z", true),
        ("SHIPMENT_DELAYED", "2025-08-05T13:00:00Z", true),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", false),
    ];
    for (code, datetime, visible) in fixtures {
        let mut event = canonical(code, datetime, "SIN");
        event.customer_visible = visible;
        let event = event.into_event(shipment.shipment_id, source.source_id, Utc::now());
        store.commit_applied(&event).await.unwrap();
    }

    let all = store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter::default(),
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    // Chronological order.
    assert_eq!(all[0].code, "CARGO_COLLECTED");
    assert_eq!(all[3].code, "FLIGHT_DEPARTED");

    let milestones = store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter {
                milestones_only: true,
                ..EventFilter::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(milestones.len(), 2);

    let exceptions = store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter {
                exceptions_only: true,
                ..EventFilter::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].code, "SHIPMENT_DELAYED");

    let visible = store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter {
                customer_visible_only: true,
                ..EventFilter::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(visible.len(), 3);

    let by_category = store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter {
                category: Some(EventCategory::LocationUpdate),
                ..EventFilter::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_category.len(), 1);

    let paged = store
        .events_for_shipment(
            shipment.shipment_id,
            &EventFilter::default(),
            Page {
                limit: 2,
                offset: 2,
            },
        )
        .await
        .unwrap();
    assert_eq!(paged.len(), 2);
    assert_eq!(paged[0].code, "SHIPMENT_DELAYED");

    let recent = store.recent_events(shipment.shipment_id, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].code, "FLIGHT_DEPARTED");
}

#[tokio::test]
async fn test_external_id_lookup() {
    let store = sqlite_store().await;
    let shipment = insert_shipment(store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let source = store
        .source_by_type(SourceType::IndustryFeed)
        .await
        .unwrap()
        .unwrap();

    let mut event = canonical("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN");
    event.external_id = Some("feed-9912".to_string());
    let event = event.into_event(shipment.shipment_id, source.source_id, Utc::now());
    store.commit_applied(&event).await.unwrap();

    let found = store.by_external_id("feed-9912").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].event_id, event.event_id);
    assert!(store.by_external_id("feed-0000").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_statistics_window() {
    let store = sqlite_store().await;
    let shipment = insert_shipment(store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let source = store
        .source_by_type(SourceType::Manual)
        .await
        .unwrap()
        .unwrap();

    for (code, datetime) in [
        ("CARGO_COLLECTED", "2025-08-05T10:00:00Z"),
        ("SHIPMENT_DELAYED", "2025-08-05T13:00:00Z"),
        ("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z"),
        // Outside the queried window.
        ("FLIGHT_ARRIVED", "2025-09-01T08:00:00Z"),
    ] {
        let event = canonical(code, datetime, "SIN").into_event(
            shipment.shipment_id,
            source.source_id,
            Utc::now(),
        );
        store.commit_applied(&event).await.unwrap();
    }

    let stats = store
        .statistics(at("2025-08-01T00:00:00Z"), at("2025-09-01T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.milestones, 2);
    assert_eq!(stats.exceptions, 1);
    assert_eq!(stats.critical, 1);
    assert_eq!(stats.notifications_sent, 0);

    let empty = store
        .statistics(at("2024-01-01T00:00:00Z"), at("2024-02-01T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(empty.total, 0);
}

#[tokio::test]
async fn test_subscription_upsert_reactivates() {
    let store = sqlite_store().await;
    let shipment = insert_shipment(store.as_ref(), "125-12345678", Uuid::new_v4()).await;
    let subscriber = Uuid::new_v4();

    let request = NewSubscription {
        shipment_id: shipment.shipment_id,
        subscriber_id: subscriber,
        method: DeliveryMethod::Email,
        endpoint: "a@example.com".to_string(),
        milestone: true,
        exception: false,
        location_updates: false,
        all_events: false,
    };
    let first = store.upsert_subscription(&request).await.unwrap();

    store
        .deactivate_subscription(first.subscription_id)
        .await
        .unwrap();
    assert!(store
        .active_for_shipment(shipment.shipment_id)
        .await
        .unwrap()
        .is_empty());

    // Same key, new endpoint: reactivated in place.
    let mut again = request;
    again.endpoint = "b@example.com".to_string();
    let second = store.upsert_subscription(&again).await.unwrap();
    assert_eq!(second.subscription_id, first.subscription_id);
    assert_eq!(second.endpoint, "b@example.com");
    assert!(second.active);

    assert_eq!(
        store
            .active_for_shipment(shipment.shipment_id)
            .await
            .unwrap()
            .len(),
        1
    );

    // Account closure path.
    assert_eq!(
        store.deactivate_for_subscriber(subscriber).await.unwrap(),
        1
    );
    assert!(store
        .active_for_shipment(shipment.shipment_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_cancel_clears_tracking() {
    let store = sqlite_store().await;
    let shipment = insert_shipment(store.as_ref(), "125-12345678", Uuid::new_v4()).await;

    store.cancel_shipment(shipment.shipment_id).await.unwrap();

    let cancelled = store.shipment(shipment.shipment_id).await.unwrap().unwrap();
    assert_eq!(cancelled.current_status, ShipmentStatus::Cancelled);
    assert!(!cancelled.tracking_enabled);
    assert!(cancelled.estimated_delivery_date.is_none());

    let due = store
        .due_for_poll(Utc::now() + Duration::days(30), 100)
        .await
        .unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn test_ping() {
    let store = sqlite_store().await;
    store.ping().await.unwrap();
}
