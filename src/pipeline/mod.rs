//! Ingestion pipeline.
//!
//! Single entry point for tracking events: eligibility, deduplication,
//! atomic persist + state derivation, then best-effort fan-out to the hub
//! and the notification dispatcher. Post-commit emit failures never roll
//! back the persisted event; the sweeper reconciles.


use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{CanonicalEvent, ShipmentSnapshot, ShipmentStatus, SourceType, TrackingEvent};
use crate::error::{Result, TrackingError};
use crate::hub::{BusEvent, TrackingHub};
use crate::notify::NotificationJob;
use crate::storage::{external_id_matches, CommitOutcome, TrackingStore};

/// Half-width of the duplicate window: two events with the same code
/// within this many seconds of each other are the same logical event.
pub const DEDUP_WINDOW_SECONDS: i64 = 300;

/// Three-valued outcome of Apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new event row exists and derived state reflects it.
    Created { event_id: Uuid },
    /// An equivalent event was already applied; no side effects.
    Duplicate,
    /// The shipment is not eligible for this apply.
    Rejected(RejectReason),
}

/// Why an apply was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Tracking is switched off and the event came from an external
    /// source. Manual applies pass regardless.
    TrackingDisabled,
    /// Cancelled shipments take no further tracking events.
    Cancelled,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackingDisabled => "tracking disabled",
            Self::Cancelled => "shipment cancelled",
        }
    }
}

/// The ingestion pipeline.
pub struct TrackingPipeline {
    store: Arc<dyn TrackingStore>,
    hub: Arc<TrackingHub>,
    jobs: mpsc::Sender<NotificationJob>,
}

impl TrackingPipeline {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        hub: Arc<TrackingHub>,
        jobs: mpsc::Sender<NotificationJob>,
    ) -> Self {
        Self { store, hub, jobs }
    }

    /// Apply one canonical event to a shipment.
    pub async fn apply(
        &self,
        shipment_id: Uuid,
        canonical: CanonicalEvent,
        origin: SourceType,
    ) -> Result<ApplyOutcome> {
        let shipment = self
            .store
            .shipment(shipment_id)
            .await?
            .ok_or(TrackingError::NotFound("shipment"))?;

        if shipment.current_status == ShipmentStatus::Cancelled {
            return Ok(ApplyOutcome::Rejected(RejectReason::Cancelled));
        }
        if !shipment.tracking_enabled && origin != SourceType::Manual {
            return Ok(ApplyOutcome::Rejected(RejectReason::TrackingDisabled));
        }

        let source = self
            .store
            .source_by_type(origin)
            .await?
            .ok_or(TrackingError::NotFound("source"))?;

        let event = canonical.into_event(shipment_id, source.source_id, Utc::now());

        // Advisory probe before taking the write transaction; the commit
        // re-checks under the lock.
        let window = Duration::seconds(DEDUP_WINDOW_SECONDS);
        let probes = self
            .store
            .find_duplicates(shipment_id, &event.code, event.event_datetime, window)
            .await?;
        for probe in probes {
            if external_id_matches(
                event.source.external_id.as_deref(),
                probe.external_id.as_deref(),
            ) {
                let earlier_priority = self
                    .store
                    .source(probe.source_id)
                    .await?
                    .map(|s| s.priority);
                debug!(
                    shipment_id = %shipment_id,
                    code = %event.code,
                    candidate_priority = source.priority,
                    earlier_priority = ?earlier_priority,
                    "dropping duplicate event"
                );
                return Ok(ApplyOutcome::Duplicate);
            }
        }

        let updated = match self.store.commit_applied(&event).await? {
            CommitOutcome::Duplicate => return Ok(ApplyOutcome::Duplicate),
            CommitOutcome::Committed(shipment) => shipment,
        };

        debug!(
            shipment_id = %shipment_id,
            event_id = %event.event_id,
            code = %event.code,
            status = %updated.current_status,
            "event applied"
        );

        // Post-commit emits are best effort by contract.
        self.emit(&event, &updated).await;

        Ok(ApplyOutcome::Created {
            event_id: event.event_id,
        })
    }

    /// Publish the bus event and enqueue notification jobs. Failures are
    /// logged and absorbed; the persisted event stands.
    async fn emit(&self, event: &TrackingEvent, shipment: &crate::domain::Shipment) {
        let bus_event = BusEvent {
            shipment_id: shipment.shipment_id,
            awb: shipment.awb.clone(),
            customer_id: shipment.customer_id,
            event: event.clone(),
            snapshot: ShipmentSnapshot::from(shipment),
        };
        self.hub.publish(&bus_event).await;

        let subscriptions = match self.store.active_for_shipment(shipment.shipment_id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!(error = %e, "post-commit subscription lookup failed");
                return;
            }
        };

        for subscription in subscriptions {
            if !subscription.matches(event) {
                continue;
            }
            let job = NotificationJob::new(event.clone(), subscription);
            if let Err(e) = self.jobs.try_send(job) {
                warn!(error = %e, "notification queue full, sweeper will recover");
            }
        }
    }
}
