//! Shared fixtures for the integration suites.
//!
//! Everything runs against the sqlite backend on an in-memory database,
//! wired the same way `App` wires production.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use cargotrack::adapters::{Result as AdapterResult, SourceAdapter};
use cargotrack::config::HubConfig;
use cargotrack::domain::{
    Awb, CanonicalEvent, EventLocation, NewShipment, Shipment, SourceType,
};
use cargotrack::hub::{SharedSecretAuthenticator, TrackingHub};
use cargotrack::notify::{
    Deliverer, DeliveryStatus, NotificationJob, RenderedNotification,
};
use cargotrack::pipeline::TrackingPipeline;
use cargotrack::storage::{ShipmentStore, SqliteTrackingStore, TrackingStore};

pub const HUB_SECRET: &str = "test-secret";

/// In-memory sqlite store with schema and reference data in place.
pub async fn sqlite_store() -> Arc<SqliteTrackingStore> {
    let store = SqliteTrackingStore::connect("sqlite::memory:", 1)
        .await
        .expect("sqlite in-memory connect");
    store.ensure_schema().await.expect("schema init");
    Arc::new(store)
}

/// The production component graph over a given store.
pub struct Wired {
    pub store: Arc<SqliteTrackingStore>,
    pub hub: Arc<TrackingHub>,
    pub pipeline: Arc<TrackingPipeline>,
    pub jobs_rx: mpsc::Receiver<NotificationJob>,
}

pub async fn wired() -> Wired {
    let store = sqlite_store().await;
    let hub = Arc::new(TrackingHub::new(
        store.clone(),
        Arc::new(SharedSecretAuthenticator::new(HUB_SECRET)),
        HubConfig::default(),
    ));
    let (jobs_tx, jobs_rx) = mpsc::channel(64);
    let pipeline = Arc::new(TrackingPipeline::new(store.clone(), hub.clone(), jobs_tx));
    Wired {
        store,
        hub,
        pipeline,
        jobs_rx,
    }
}

pub fn shipment_request(awb: &str, customer_id: Uuid) -> NewShipment {
    NewShipment {
        awb: Awb::new(awb).unwrap(),
        customer_id,
        origin: "SIN".to_string(),
        destination: "HKG".to_string(),
        route: vec![],
        flight_number: None,
        flight_date: None,
        pieces: 2,
        weight_kg: 10.5,
        volume_m3: None,
        commodity: "electronics".to_string(),
        declared_value: None,
        currency: None,
        pickup_date: None,
        estimated_delivery_date: None,
        tracking_frequency_minutes: Some(60),
    }
}

pub async fn insert_shipment(
    store: &dyn TrackingStore,
    awb: &str,
    customer_id: Uuid,
) -> Shipment {
    let shipment = shipment_request(awb, customer_id).into_shipment(Utc::now());
    store.insert_shipment(&shipment).await.unwrap();
    shipment
}

pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn canonical(code: &str, datetime: &str, airport: &str) -> CanonicalEvent {
    let mut event = CanonicalEvent::classified(code, code, at(datetime), "UTC");
    if !airport.is_empty() {
        event.location = EventLocation::airport(airport);
    }
    event
}

/// Adapter replaying a fixed result, for scheduler-level suites.
pub struct ScriptAdapter {
    pub source_type: SourceType,
    pub events: Vec<CanonicalEvent>,
    pub calls: AtomicUsize,
}

impl ScriptAdapter {
    pub fn returning(events: Vec<CanonicalEvent>) -> Arc<Self> {
        Arc::new(Self {
            source_type: SourceType::Carrier,
            events,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptAdapter {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn fetch(&self, _shipment: &Shipment) -> AdapterResult<Vec<CanonicalEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.events.clone())
    }
}

/// Deliverer replaying a scripted status sequence.
pub struct ScriptDeliverer {
    script: Mutex<Vec<DeliveryStatus>>,
    pub calls: AtomicUsize,
}

impl ScriptDeliverer {
    pub fn new(mut script: Vec<DeliveryStatus>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deliverer for ScriptDeliverer {
    async fn deliver(
        &self,
        _endpoint: &str,
        _notification: &RenderedNotification,
    ) -> DeliveryStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().await.pop().unwrap_or(DeliveryStatus::Ok)
    }
}
