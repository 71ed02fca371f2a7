//! Read-side and operator handler surface.
//!
//! The HTTP/WebSocket front-end is an external collaborator: it maps
//! routes, decodes bodies, authenticates, and builds a `Caller`. These
//! handlers own validation, access checks, and outcome semantics; the
//! front-end maps `TrackingError` kinds onto status codes.


use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::{ManualAdapter, ManualEventRequest};
use crate::domain::{
    Awb, NewShipment, NewSubscription, Shipment, ShipmentSnapshot, SourceType, Subscription,
    TrackingEvent,
};
use crate::error::{Result, TrackingError};
use crate::pipeline::{ApplyOutcome, TrackingPipeline};
use crate::scheduler::{PollScheduler, RefreshSummary, TickSummary};
use crate::storage::{EventFilter, EventStatistics, Page, TrackingStore};

/// Page limit for shipment-level listings.
pub const MAX_PAGE_LIMIT: u32 = 100;
/// Page limit for event listings.
pub const MAX_EVENT_PAGE_LIMIT: u32 = 1000;
/// Upper bound on one bulk refresh request.
pub const MAX_BULK_REFRESH: usize = 100;
/// Events included in the public tracking snapshot.
const PUBLIC_SNAPSHOT_EVENTS: u32 = 10;

/// Caller privilege, as established by the front-end's auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Public,
    Customer,
    Operator,
    Admin,
}

/// Authenticated (or anonymous) caller identity.
#[derive(Debug, Clone)]
pub struct Caller {
    pub subscriber_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub role: Role,
}

impl Caller {
    pub fn public() -> Self {
        Self {
            subscriber_id: None,
            customer_id: None,
            role: Role::Public,
        }
    }

    pub fn customer(subscriber_id: Uuid, customer_id: Uuid) -> Self {
        Self {
            subscriber_id: Some(subscriber_id),
            customer_id: Some(customer_id),
            role: Role::Customer,
        }
    }

    pub fn operator(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id: Some(subscriber_id),
            customer_id: None,
            role: Role::Operator,
        }
    }

    pub fn admin(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id: Some(subscriber_id),
            customer_id: None,
            role: Role::Admin,
        }
    }

    fn require_role(&self, minimum: Role) -> Result<()> {
        if self.role >= minimum {
            Ok(())
        } else {
            Err(TrackingError::AccessDenied)
        }
    }

    /// Customer-scoped callers only see what they own; staff see all.
    fn check_shipment_access(&self, shipment: &Shipment) -> Result<()> {
        match self.role {
            Role::Public => Err(TrackingError::AccessDenied),
            Role::Customer => {
                if self.customer_id == Some(shipment.customer_id) {
                    Ok(())
                } else {
                    Err(TrackingError::AccessDenied)
                }
            }
            Role::Operator | Role::Admin => Ok(()),
        }
    }
}

/// Inclusive-exclusive date range for statistics queries.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DateRange {
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

impl DateRange {
    fn validate(&self) -> Result<()> {
        if self.date_from < self.date_to {
            Ok(())
        } else {
            Err(TrackingError::Validation(
                "date_from must be before date_to".to_string(),
            ))
        }
    }
}

/// Anonymous tracking view: the best snapshot available, even when the
/// latest upstream refresh failed.
#[derive(Debug, Clone, Serialize)]
pub struct PublicSnapshot {
    pub snapshot: ShipmentSnapshot,
    /// Customer-visible events, newest first.
    pub recent_events: Vec<TrackingEvent>,
}

/// Authenticated view with full history.
#[derive(Debug, Clone, Serialize)]
pub struct FullSnapshot {
    pub shipment: Shipment,
    pub events: Vec<TrackingEvent>,
}

/// Offset-paginated listing.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Bulk refresh accounting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BulkRefreshReport {
    pub requested: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub events_created: usize,
}

/// Service health report.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub healthy: bool,
    pub database: bool,
    pub checked_at: DateTime<Utc>,
}

/// The handler surface wired into the front-end.
pub struct TrackingApi {
    store: Arc<dyn TrackingStore>,
    pipeline: Arc<TrackingPipeline>,
    scheduler: Arc<PollScheduler>,
}

impl TrackingApi {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        pipeline: Arc<TrackingPipeline>,
        scheduler: Arc<PollScheduler>,
    ) -> Self {
        Self {
            store,
            pipeline,
            scheduler,
        }
    }

    /// GET /tracking/awb/{awb} - public, rate-limited by the front-end.
    pub async fn track_by_awb(&self, awb: &Awb) -> Result<PublicSnapshot> {
        let shipment = self
            .store
            .shipment_by_awb(awb)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;

        let recent_events = self
            .store
            .recent_events(shipment.shipment_id, PUBLIC_SNAPSHOT_EVENTS * 2)
            .await?
            .into_iter()
            .filter(|e| e.customer_visible)
            .take(PUBLIC_SNAPSHOT_EVENTS as usize)
            .collect();

        Ok(PublicSnapshot {
            snapshot: ShipmentSnapshot::from(&shipment),
            recent_events,
        })
    }

    /// GET /tracking/shipments/{id} - authed full snapshot with history.
    pub async fn shipment_snapshot(
        &self,
        caller: &Caller,
        shipment_id: Uuid,
    ) -> Result<FullSnapshot> {
        let shipment = self
            .store
            .shipment(shipment_id)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;
        caller.check_shipment_access(&shipment)?;

        let events = self
            .store
            .events_for_shipment(
                shipment_id,
                &EventFilter::default(),
                Page {
                    limit: MAX_EVENT_PAGE_LIMIT,
                    offset: 0,
                },
            )
            .await?;

        Ok(FullSnapshot { shipment, events })
    }

    /// GET /tracking/customer/{id}/history - authed, self only.
    pub async fn customer_history(
        &self,
        caller: &Caller,
        customer_id: Uuid,
        page: Page,
    ) -> Result<Paged<ShipmentSnapshot>> {
        match caller.role {
            Role::Public => return Err(TrackingError::AccessDenied),
            Role::Customer if caller.customer_id != Some(customer_id) => {
                return Err(TrackingError::AccessDenied)
            }
            _ => {}
        }

        let page = page.clamped(MAX_PAGE_LIMIT);
        let shipments = self.store.shipments_for_customer(customer_id, page).await?;
        let total = self.store.customer_shipment_count(customer_id).await?;

        Ok(Paged {
            items: shipments.iter().map(ShipmentSnapshot::from).collect(),
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// GET /tracking/shipments/{id}/events - authed, filterable.
    pub async fn shipment_events(
        &self,
        caller: &Caller,
        shipment_id: Uuid,
        filter: EventFilter,
        page: Page,
    ) -> Result<Paged<TrackingEvent>> {
        let shipment = self
            .store
            .shipment(shipment_id)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;
        caller.check_shipment_access(&shipment)?;

        let page = page.clamped(MAX_EVENT_PAGE_LIMIT);
        let events = self
            .store
            .events_for_shipment(shipment_id, &filter, page)
            .await?;
        let total = self.store.event_count(shipment_id).await?;

        Ok(Paged {
            items: events,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// POST /tracking/events - manual apply, operator and up.
    pub async fn apply_manual(
        &self,
        caller: &Caller,
        request: ManualEventRequest,
    ) -> Result<ApplyOutcome> {
        caller.require_role(Role::Operator)?;

        let shipment_id = request.shipment_id;
        let canonical =
            ManualAdapter::normalize(request).map_err(TrackingError::Validation)?;

        self.pipeline
            .apply(shipment_id, canonical, SourceType::Manual)
            .await
    }

    /// POST /tracking/update/{awb} - force one refresh, operator and up.
    pub async fn refresh(&self, caller: &Caller, awb: &Awb) -> Result<RefreshSummary> {
        caller.require_role(Role::Operator)?;

        let shipment = self
            .store
            .shipment_by_awb(awb)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;

        let summary = self.scheduler.refresh_shipment(&shipment).await;
        self.store
            .touch_last_tracked(&[shipment.shipment_id], Utc::now())
            .await?;
        Ok(summary)
    }

    /// POST /tracking/bulk-update - force refresh for up to 100 shipments.
    pub async fn bulk_refresh(
        &self,
        caller: &Caller,
        shipment_ids: Vec<Uuid>,
    ) -> Result<BulkRefreshReport> {
        caller.require_role(Role::Operator)?;

        if shipment_ids.is_empty() {
            return Err(TrackingError::Validation(
                "shipment_ids must not be empty".to_string(),
            ));
        }
        if shipment_ids.len() > MAX_BULK_REFRESH {
            return Err(TrackingError::Validation(format!(
                "bulk refresh is limited to {MAX_BULK_REFRESH} shipments"
            )));
        }

        let mut report = BulkRefreshReport {
            requested: shipment_ids.len(),
            ..BulkRefreshReport::default()
        };

        let mut refreshed_ids = Vec::new();
        for shipment_id in shipment_ids {
            let Some(shipment) = self.store.shipment(shipment_id).await? else {
                report.skipped += 1;
                continue;
            };
            if shipment.is_quiescent() || !shipment.tracking_enabled {
                report.skipped += 1;
                continue;
            }
            let summary = self.scheduler.refresh_shipment(&shipment).await;
            report.refreshed += 1;
            report.events_created += summary.events_created;
            refreshed_ids.push(shipment.shipment_id);
        }

        if !refreshed_ids.is_empty() {
            self.store
                .touch_last_tracked(&refreshed_ids, Utc::now())
                .await?;
        }
        Ok(report)
    }

    /// POST /tracking/subscribe - create or reactivate a subscription.
    pub async fn create_subscription(
        &self,
        caller: &Caller,
        request: NewSubscription,
    ) -> Result<Subscription> {
        caller.require_role(Role::Customer)?;
        request.validate().map_err(TrackingError::Validation)?;

        let shipment = self
            .store
            .shipment(request.shipment_id)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;
        caller.check_shipment_access(&shipment)?;

        // Subscribers act for themselves; staff may register on behalf.
        if caller.role == Role::Customer
            && caller.subscriber_id != Some(request.subscriber_id)
        {
            return Err(TrackingError::AccessDenied);
        }

        Ok(self.store.upsert_subscription(&request).await?)
    }

    /// Service-request intake: create the shipment aggregate.
    pub async fn create_shipment(
        &self,
        caller: &Caller,
        request: NewShipment,
    ) -> Result<Shipment> {
        caller.require_role(Role::Operator)?;
        request.validate().map_err(TrackingError::Validation)?;

        if self.store.shipment_by_awb(&request.awb).await?.is_some() {
            return Err(TrackingError::Validation(format!(
                "awb {} already exists",
                request.awb
            )));
        }

        let shipment = request.into_shipment(Utc::now());
        self.store.insert_shipment(&shipment).await?;
        Ok(shipment)
    }

    /// Administrative cancel: the only path to `CANCELLED`.
    pub async fn cancel_shipment(&self, caller: &Caller, shipment_id: Uuid) -> Result<()> {
        caller.require_role(Role::Admin)?;

        self.store
            .shipment(shipment_id)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;
        self.store.cancel_shipment(shipment_id).await?;
        Ok(())
    }

    /// GET /tracking/statistics - admin stats window.
    pub async fn statistics(
        &self,
        caller: &Caller,
        range: DateRange,
    ) -> Result<EventStatistics> {
        caller.require_role(Role::Admin)?;
        range.validate()?;
        Ok(self
            .store
            .statistics(range.date_from, range.date_to)
            .await?)
    }

    /// POST /tracking/process-updates - one-shot scheduler tick.
    pub async fn process_updates(&self, caller: &Caller) -> Result<TickSummary> {
        caller.require_role(Role::Admin)?;
        Ok(self.scheduler.run_tick().await)
    }

    /// GET /tracking/health - public liveness.
    pub async fn health(&self) -> Health {
        let database = self.store.ping().await.is_ok();
        Health {
            healthy: database,
            database,
            checked_at: Utc::now(),
        }
    }
}
