//! In-memory mock storage for testing.
//!
//! Implements every store trait over `RwLock`'d maps with the same
//! semantics as the sqlite backend, plus failure injection for exercising
//! error paths.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    derive_state, Awb, NewSubscription, Shipment, ShipmentStatus, Source, SourceType,
    Subscription, TrackingEvent,
};
use crate::storage::{
    external_id_matches, CommitOutcome, DeliveryLogStore, DuplicateProbe, EventFilter,
    EventStatistics, EventStore, FailedDelivery, Page, Result, ShipmentStore, SourceStore,
    StorageError, SubscriptionStore, TrackingStore,
};

#[derive(Debug, Clone)]
struct DeliveryRecord {
    delivered: bool,
    attempts: u32,
    error: Option<String>,
    completed_at: DateTime<Utc>,
}

#[derive(Default)]
struct MockState {
    shipments: HashMap<Uuid, Shipment>,
    events: HashMap<Uuid, Vec<TrackingEvent>>,
    subscriptions: HashMap<Uuid, Subscription>,
    deliveries: HashMap<(Uuid, Uuid), DeliveryRecord>,
    sources: Vec<Source>,
}

/// Mock tracking store that keeps everything in memory.
pub struct MockTrackingStore {
    state: RwLock<MockState>,
    fail_on_commit: RwLock<bool>,
}

impl Default for MockTrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTrackingStore {
    pub fn new() -> Self {
        let state = MockState {
            sources: Source::seed_rows(),
            ..MockState::default()
        };
        Self {
            state: RwLock::new(state),
            fail_on_commit: RwLock::new(false),
        }
    }

    /// Make the next commits fail with `Unavailable`.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail_on_commit.write().await = fail;
    }

    /// Raw event access for assertions.
    pub async fn all_events(&self, shipment_id: Uuid) -> Vec<TrackingEvent> {
        self.state
            .read()
            .await
            .events
            .get(&shipment_id)
            .cloned()
            .unwrap_or_default()
    }

    fn sorted_events(events: &[TrackingEvent]) -> Vec<TrackingEvent> {
        let mut sorted = events.to_vec();
        sorted.sort_by(|a, b| {
            (a.event_datetime, a.created_at).cmp(&(b.event_datetime, b.created_at))
        });
        sorted
    }
}

#[async_trait]
impl EventStore for MockTrackingStore {
    async fn events_for_shipment(
        &self,
        shipment_id: Uuid,
        filter: &EventFilter,
        page: Page,
    ) -> Result<Vec<TrackingEvent>> {
        let state = self.state.read().await;
        let events = state
            .events
            .get(&shipment_id)
            .map(|e| Self::sorted_events(e))
            .unwrap_or_default();

        Ok(events
            .into_iter()
            .filter(|e| {
                filter.category.map(|c| e.category == c).unwrap_or(true)
                    && (!filter.milestones_only || e.is_milestone)
                    && (!filter.exceptions_only || e.is_exception)
                    && (!filter.customer_visible_only || e.customer_visible)
            })
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn recent_events(&self, shipment_id: Uuid, limit: u32) -> Result<Vec<TrackingEvent>> {
        let state = self.state.read().await;
        let mut events = state
            .events
            .get(&shipment_id)
            .map(|e| Self::sorted_events(e))
            .unwrap_or_default();
        events.reverse();
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn find_duplicates(
        &self,
        shipment_id: Uuid,
        code: &str,
        around: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<DuplicateProbe>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .get(&shipment_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| {
                        e.code == code
                            && e.event_datetime > around - window
                            && e.event_datetime < around + window
                    })
                    .map(|e| DuplicateProbe {
                        event_id: e.event_id,
                        external_id: e.source.external_id.clone(),
                        source_id: e.source.source_id,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn by_external_id(&self, external_id: &str) -> Result<Vec<TrackingEvent>> {
        let state = self.state.read().await;
        let mut matches: Vec<TrackingEvent> = state
            .events
            .values()
            .flatten()
            .filter(|e| e.source.external_id.as_deref() == Some(external_id))
            .cloned()
            .collect();
        matches.sort_by_key(|e| e.event_datetime);
        Ok(matches)
    }

    async fn statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EventStatistics> {
        let state = self.state.read().await;
        let mut stats = EventStatistics::default();
        for event in state.events.values().flatten() {
            if event.event_datetime < from || event.event_datetime >= to {
                continue;
            }
            stats.total += 1;
            stats.milestones += event.is_milestone as u64;
            stats.exceptions += event.is_exception as u64;
            stats.critical += event.is_critical as u64;
            stats.customer_visible += event.customer_visible as u64;
            stats.notifications_sent += event.notification_sent as u64;
        }
        Ok(stats)
    }

    async fn mark_notification_sent(&self, event_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        for events in state.events.values_mut() {
            if let Some(event) = events.iter_mut().find(|e| e.event_id == event_id) {
                event.notification_sent = true;
                return Ok(());
            }
        }
        Err(StorageError::NotFound { entity: "event" })
    }

    async fn event_count(&self, shipment_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .events
            .get(&shipment_id)
            .map(|e| e.len() as u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ShipmentStore for MockTrackingStore {
    async fn shipment(&self, shipment_id: Uuid) -> Result<Option<Shipment>> {
        Ok(self.state.read().await.shipments.get(&shipment_id).cloned())
    }

    async fn shipment_by_awb(&self, awb: &Awb) -> Result<Option<Shipment>> {
        Ok(self
            .state
            .read()
            .await
            .shipments
            .values()
            .find(|s| &s.awb == awb)
            .cloned())
    }

    async fn insert_shipment(&self, shipment: &Shipment) -> Result<()> {
        let mut state = self.state.write().await;
        if state.shipments.values().any(|s| s.awb == shipment.awb) {
            return Err(StorageError::Conflict(format!(
                "awb {} already exists",
                shipment.awb
            )));
        }
        state
            .shipments
            .insert(shipment.shipment_id, shipment.clone());
        Ok(())
    }

    async fn shipments_for_customer(
        &self,
        customer_id: Uuid,
        page: Page,
    ) -> Result<Vec<Shipment>> {
        let state = self.state.read().await;
        let mut shipments: Vec<Shipment> = state
            .shipments
            .values()
            .filter(|s| s.customer_id == customer_id)
            .cloned()
            .collect();
        shipments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(shipments
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn customer_shipment_count(&self, customer_id: Uuid) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .shipments
            .values()
            .filter(|s| s.customer_id == customer_id)
            .count() as u64)
    }

    async fn due_for_poll(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Shipment>> {
        let state = self.state.read().await;
        let mut due: Vec<Shipment> = state
            .shipments
            .values()
            .filter(|s| {
                s.tracking_enabled
                    && !s.current_status.is_terminal()
                    && match s.last_tracked_at {
                        None => true,
                        Some(last) => {
                            now - last >= Duration::minutes(s.tracking_frequency_minutes as i64)
                        }
                    }
            })
            .cloned()
            .collect();
        // Never-tracked shipments first, then the most stale.
        due.sort_by_key(|s| (s.last_tracked_at.is_some(), s.last_tracked_at));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn touch_last_tracked(
        &self,
        shipment_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for id in shipment_ids {
            if let Some(shipment) = state.shipments.get_mut(id) {
                shipment.last_tracked_at = Some(at);
            }
        }
        Ok(())
    }

    async fn set_tracking_enabled(&self, shipment_id: Uuid, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let shipment = state
            .shipments
            .get_mut(&shipment_id)
            .ok_or(StorageError::NotFound {
                entity: "shipment",
            })?;
        shipment.tracking_enabled = enabled;
        Ok(())
    }

    async fn cancel_shipment(&self, shipment_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let shipment = state
            .shipments
            .get_mut(&shipment_id)
            .ok_or(StorageError::NotFound {
                entity: "shipment",
            })?;
        shipment.current_status = ShipmentStatus::Cancelled;
        shipment.tracking_enabled = false;
        shipment.estimated_delivery_date = None;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MockTrackingStore {
    async fn upsert_subscription(&self, request: &NewSubscription) -> Result<Subscription> {
        let mut state = self.state.write().await;

        let existing = state.subscriptions.values().find(|s| {
            s.shipment_id == request.shipment_id
                && s.subscriber_id == request.subscriber_id
                && s.method == request.method
        });

        let subscription = match existing {
            Some(found) => {
                let id = found.subscription_id;
                let subscription = Subscription {
                    subscription_id: id,
                    shipment_id: request.shipment_id,
                    subscriber_id: request.subscriber_id,
                    method: request.method,
                    endpoint: request.endpoint.clone(),
                    milestone: request.milestone,
                    exception: request.exception,
                    location_updates: request.location_updates,
                    all_events: request.all_events,
                    active: true,
                    created_at: found.created_at,
                };
                state.subscriptions.insert(id, subscription.clone());
                subscription
            }
            None => {
                let subscription = Subscription {
                    subscription_id: Uuid::new_v4(),
                    shipment_id: request.shipment_id,
                    subscriber_id: request.subscriber_id,
                    method: request.method,
                    endpoint: request.endpoint.clone(),
                    milestone: request.milestone,
                    exception: request.exception,
                    location_updates: request.location_updates,
                    all_events: request.all_events,
                    active: true,
                    created_at: Utc::now(),
                };
                state
                    .subscriptions
                    .insert(subscription.subscription_id, subscription.clone());
                subscription
            }
        };

        Ok(subscription)
    }

    async fn subscription(&self, subscription_id: Uuid) -> Result<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn active_for_shipment(&self, shipment_id: Uuid) -> Result<Vec<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.shipment_id == shipment_id && s.active)
            .cloned()
            .collect())
    }

    async fn deactivate_subscription(&self, subscription_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let subscription =
            state
                .subscriptions
                .get_mut(&subscription_id)
                .ok_or(StorageError::NotFound {
                    entity: "subscription",
                })?;
        subscription.active = false;
        Ok(())
    }

    async fn deactivate_for_subscriber(&self, subscriber_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for subscription in state.subscriptions.values_mut() {
            if subscription.subscriber_id == subscriber_id && subscription.active {
                subscription.active = false;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl SourceStore for MockTrackingStore {
    async fn source(&self, source_id: Uuid) -> Result<Option<Source>> {
        Ok(self
            .state
            .read()
            .await
            .sources
            .iter()
            .find(|s| s.source_id == source_id)
            .cloned())
    }

    async fn source_by_type(&self, source_type: SourceType) -> Result<Option<Source>> {
        Ok(self
            .state
            .read()
            .await
            .sources
            .iter()
            .find(|s| s.source_type == source_type)
            .cloned())
    }

    async fn sources(&self) -> Result<Vec<Source>> {
        Ok(self.state.read().await.sources.clone())
    }
}

#[async_trait]
impl DeliveryLogStore for MockTrackingStore {
    async fn record_delivered(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
    ) -> Result<()> {
        self.state.write().await.deliveries.insert(
            (event_id, subscription_id),
            DeliveryRecord {
                delivered: true,
                attempts,
                error: None,
                completed_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn record_failed(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
        error: &str,
    ) -> Result<()> {
        self.state.write().await.deliveries.insert(
            (event_id, subscription_id),
            DeliveryRecord {
                delivered: false,
                attempts,
                error: Some(error.to_string()),
                completed_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn is_delivered(&self, event_id: Uuid, subscription_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .deliveries
            .get(&(event_id, subscription_id))
            .map(|r| r.delivered)
            .unwrap_or(false))
    }

    async fn failed_jobs(&self, limit: u32) -> Result<Vec<FailedDelivery>> {
        let state = self.state.read().await;
        let mut failed: Vec<FailedDelivery> = state
            .deliveries
            .iter()
            .filter(|(_, record)| !record.delivered)
            .map(|((event_id, subscription_id), record)| FailedDelivery {
                event_id: *event_id,
                subscription_id: *subscription_id,
                attempts: record.attempts,
                error: record.error.clone().unwrap_or_default(),
                failed_at: record.completed_at,
            })
            .collect();
        failed.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn missing_deliveries(
        &self,
        limit: u32,
    ) -> Result<Vec<(TrackingEvent, Subscription)>> {
        let state = self.state.read().await;
        let mut pairs = Vec::new();

        for events in state.events.values() {
            for event in events {
                if event.notification_sent {
                    continue;
                }
                for subscription in state.subscriptions.values() {
                    if subscription.shipment_id != event.shipment_id {
                        continue;
                    }
                    if !subscription.matches(event) {
                        continue;
                    }
                    if state
                        .deliveries
                        .contains_key(&(event.event_id, subscription.subscription_id))
                    {
                        continue;
                    }
                    pairs.push((event.clone(), subscription.clone()));
                    if pairs.len() >= limit as usize {
                        return Ok(pairs);
                    }
                }
            }
        }
        Ok(pairs)
    }
}

#[async_trait]
impl TrackingStore for MockTrackingStore {
    async fn commit_applied(&self, event: &TrackingEvent) -> Result<CommitOutcome> {
        if *self.fail_on_commit.read().await {
            return Err(StorageError::Unavailable("commit failure injected".into()));
        }

        let mut state = self.state.write().await;

        if !state.shipments.contains_key(&event.shipment_id) {
            return Err(StorageError::NotFound {
                entity: "shipment",
            });
        }

        let window = Duration::seconds(300);
        if let Some(existing) = state.events.get(&event.shipment_id) {
            let duplicate = existing.iter().any(|e| {
                e.code == event.code
                    && e.event_datetime > event.event_datetime - window
                    && e.event_datetime < event.event_datetime + window
                    && external_id_matches(
                        event.source.external_id.as_deref(),
                        e.source.external_id.as_deref(),
                    )
            });
            if duplicate {
                return Ok(CommitOutcome::Duplicate);
            }
        }

        let events = state.events.entry(event.shipment_id).or_default();
        events.push(event.clone());
        let derived = derive_state(events);

        let shipment = state
            .shipments
            .get_mut(&event.shipment_id)
            .ok_or(StorageError::NotFound {
                entity: "shipment",
            })?;

        shipment.current_status = derived.status;
        if let Some(location) = derived.location.clone() {
            shipment.current_location = Some(location);
        }
        shipment.delivery_date = derived.delivery_date;
        shipment.estimated_delivery_date =
            derived.merged_estimate(shipment.estimated_delivery_date);
        shipment.has_exceptions = derived.has_exceptions;

        Ok(CommitOutcome::Committed(shipment.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
