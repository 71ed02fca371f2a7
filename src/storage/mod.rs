//! Event and shipment persistence.
//!
//! This module contains:
//! - `EventStore` / `ShipmentStore` / `SubscriptionStore` / `SourceStore` /
//!   `DeliveryLogStore` traits: the per-entity persistence seams
//! - `TrackingStore`: the combined store with the atomic apply transaction
//! - Implementations: sqlite (default feature), in-memory mock for tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
#[cfg(feature = "sqlite")]
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    Awb, EventCategory, NewSubscription, Shipment, Source, SourceType, Subscription,
    TrackingEvent,
};

pub mod helpers;
pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockTrackingStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTrackingStore;

#[cfg(feature = "sqlite")]
use std::sync::Arc;

// ============================================================================
// Errors
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("constraint violated: {0}")]
    Conflict(String),

    #[error("malformed row: {0}")]
    InvalidRow(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Query types
// ============================================================================

/// Offset pagination with a caller-facing limit cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    /// Clamp the limit into `[1, max]`.
    pub fn clamped(self, max: u32) -> Self {
        Self {
            limit: self.limit.clamp(1, max),
            offset: self.offset,
        }
    }
}

/// Filter flags for event range queries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub category: Option<EventCategory>,
    pub milestones_only: bool,
    pub exceptions_only: bool,
    pub customer_visible_only: bool,
}

/// Flag counts over a date range.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EventStatistics {
    pub total: u64,
    pub milestones: u64,
    pub exceptions: u64,
    pub critical: u64,
    pub customer_visible: u64,
    pub notifications_sent: u64,
}

/// Slim row used by the duplicate probe: enough to apply the
/// external-id rule and name the earlier source in logs.
#[derive(Debug, Clone)]
pub struct DuplicateProbe {
    pub event_id: Uuid,
    pub external_id: Option<String>,
    pub source_id: Uuid,
}

/// Outcome of the atomic apply transaction.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Event inserted; the shipment row reflects the rederived state.
    Committed(Shipment),
    /// An equivalent event was already persisted; nothing changed.
    Duplicate,
}

/// External-id half of the duplicate rule: ids agree when both sides
/// carry one and they are equal, or when neither side carries one. A
/// probe where exactly one side has an id is not a duplicate.
pub fn external_id_matches(candidate: Option<&str>, existing: Option<&str>) -> bool {
    match (candidate, existing) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}

/// A delivery that exhausted its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDelivery {
    pub event_id: Uuid,
    pub subscription_id: Uuid,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// Traits
// ============================================================================

/// Interface for the append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Range query by shipment with filter flags, chronological order.
    async fn events_for_shipment(
        &self,
        shipment_id: Uuid,
        filter: &EventFilter,
        page: Page,
    ) -> Result<Vec<TrackingEvent>>;

    /// Latest events for a shipment, newest first.
    async fn recent_events(&self, shipment_id: Uuid, limit: u32) -> Result<Vec<TrackingEvent>>;

    /// Candidate duplicates: same shipment and code, event time within
    /// `window` of `around`.
    async fn find_duplicates(
        &self,
        shipment_id: Uuid,
        code: &str,
        around: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<DuplicateProbe>>;

    /// Reconciliation lookup by upstream id, across sources.
    async fn by_external_id(&self, external_id: &str) -> Result<Vec<TrackingEvent>>;

    /// Flag counts over `[from, to)`.
    async fn statistics(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<EventStatistics>;

    /// Flip `notification_sent` once every matching subscription has a
    /// completed delivery.
    async fn mark_notification_sent(&self, event_id: Uuid) -> Result<()>;

    async fn event_count(&self, shipment_id: Uuid) -> Result<u64>;
}

/// Interface for the shipment aggregate rows.
#[async_trait]
pub trait ShipmentStore: Send + Sync {
    async fn shipment(&self, shipment_id: Uuid) -> Result<Option<Shipment>>;

    async fn shipment_by_awb(&self, awb: &Awb) -> Result<Option<Shipment>>;

    /// Intake insert. Fails on a duplicate AWB.
    async fn insert_shipment(&self, shipment: &Shipment) -> Result<()>;

    async fn shipments_for_customer(&self, customer_id: Uuid, page: Page)
        -> Result<Vec<Shipment>>;

    async fn customer_shipment_count(&self, customer_id: Uuid) -> Result<u64>;

    /// Shipments due for refresh: tracking enabled, non-terminal status,
    /// and never tracked or past their frequency window.
    async fn due_for_poll(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Shipment>>;

    /// Stamp `last_tracked_at` for a completed tick, success or not.
    async fn touch_last_tracked(&self, shipment_ids: &[Uuid], at: DateTime<Utc>) -> Result<()>;

    async fn set_tracking_enabled(&self, shipment_id: Uuid, enabled: bool) -> Result<()>;

    /// Administrative cancel: the only path to `CANCELLED`.
    async fn cancel_shipment(&self, shipment_id: Uuid) -> Result<()>;
}

/// Interface for notification subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or reactivate on the `(shipment, subscriber, method)` key,
    /// refreshing endpoint and filter flags.
    async fn upsert_subscription(&self, request: &NewSubscription) -> Result<Subscription>;

    async fn subscription(&self, subscription_id: Uuid) -> Result<Option<Subscription>>;

    async fn active_for_shipment(&self, shipment_id: Uuid) -> Result<Vec<Subscription>>;

    async fn deactivate_subscription(&self, subscription_id: Uuid) -> Result<()>;

    /// Account closure: deactivate everything a subscriber owns.
    async fn deactivate_for_subscriber(&self, subscriber_id: Uuid) -> Result<u64>;
}

/// Interface for upstream source reference data.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn source(&self, source_id: Uuid) -> Result<Option<Source>>;

    async fn source_by_type(&self, source_type: SourceType) -> Result<Option<Source>>;

    async fn sources(&self) -> Result<Vec<Source>>;
}

/// Interface for per-(event, subscription) delivery records.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn record_delivered(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
    ) -> Result<()>;

    async fn record_failed(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
        error: &str,
    ) -> Result<()>;

    async fn is_delivered(&self, event_id: Uuid, subscription_id: Uuid) -> Result<bool>;

    /// The failed-jobs log, newest first.
    async fn failed_jobs(&self, limit: u32) -> Result<Vec<FailedDelivery>>;

    /// (event, subscription) pairs where the subscription matches the
    /// event but no completed delivery record exists. Sweeper input;
    /// recovers from post-commit emit losses.
    async fn missing_deliveries(&self, limit: u32)
        -> Result<Vec<(TrackingEvent, Subscription)>>;
}

/// Combined store handed to the pipeline, hub, scheduler, and dispatcher.
///
/// `commit_applied` is the one write path for tracking events: the
/// duplicate re-check, event insert, state rederivation, and shipment
/// update run inside a single transaction.
#[async_trait]
pub trait TrackingStore:
    EventStore + ShipmentStore + SubscriptionStore + SourceStore + DeliveryLogStore
{
    async fn commit_applied(&self, event: &TrackingEvent) -> Result<CommitOutcome>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<()>;

    /// Release pooled connections. Default is a no-op for in-memory
    /// backends.
    async fn close(&self) {}
}

// ============================================================================
// Configuration & factory
// ============================================================================

/// Initialize storage from configuration.
///
/// The sqlite backend creates its schema and seeds the reference tables
/// on first start.
#[cfg(feature = "sqlite")]
pub async fn init_storage(
    config: &crate::config::DatabaseConfig,
) -> std::result::Result<Arc<dyn TrackingStore>, Box<dyn std::error::Error + Send + Sync>> {
    info!(url = %config.url, "Storage: sqlite");

    let store = SqliteTrackingStore::connect(&config.url, config.max_connections).await?;
    store.ensure_schema().await?;

    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_rule() {
        assert!(external_id_matches(Some("x1"), Some("x1")));
        assert!(!external_id_matches(Some("x1"), Some("x2")));
        assert!(external_id_matches(None, None));
        assert!(!external_id_matches(Some("x1"), None));
        assert!(!external_id_matches(None, Some("x1")));
    }

    #[test]
    fn test_page_clamp() {
        assert_eq!(Page { limit: 0, offset: 3 }.clamped(100).limit, 1);
        assert_eq!(Page { limit: 5000, offset: 0 }.clamped(1000).limit, 1000);
        assert_eq!(Page { limit: 20, offset: 0 }.clamped(100).limit, 20);
    }
}
