//! SQLite DeliveryLogStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{Subscription, TrackingEvent};
use crate::storage::helpers::{fmt_ts, parse_ts};
use crate::storage::{DeliveryLogStore, FailedDelivery, Result};

use super::{event_from_row, SqliteTrackingStore};

const STATUS_DELIVERED: &str = "DELIVERED";
const STATUS_FAILED: &str = "FAILED";

impl SqliteTrackingStore {
    async fn record_completion(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        status: &str,
        attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        // Latest completion wins; a retry that eventually lands overwrites
        // an earlier failure record.
        let sql = "INSERT INTO notification_deliveries \
                   (event_id, subscription_id, status, attempts, error, completed_at) \
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                   ON CONFLICT (event_id, subscription_id) DO UPDATE SET \
                   status = excluded.status, \
                   attempts = excluded.attempts, \
                   error = excluded.error, \
                   completed_at = excluded.completed_at";

        sqlx::query(sql)
            .bind(event_id.to_string())
            .bind(subscription_id.to_string())
            .bind(status)
            .bind(attempts as i64)
            .bind(error)
            .bind(fmt_ts(Utc::now()))
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryLogStore for SqliteTrackingStore {
    async fn record_delivered(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
    ) -> Result<()> {
        self.record_completion(event_id, subscription_id, STATUS_DELIVERED, attempts, None)
            .await
    }

    async fn record_failed(
        &self,
        event_id: Uuid,
        subscription_id: Uuid,
        attempts: u32,
        error: &str,
    ) -> Result<()> {
        self.record_completion(
            event_id,
            subscription_id,
            STATUS_FAILED,
            attempts,
            Some(error),
        )
        .await
    }

    async fn is_delivered(&self, event_id: Uuid, subscription_id: Uuid) -> Result<bool> {
        let sql = "SELECT 1 FROM notification_deliveries \
                   WHERE event_id = ?1 AND subscription_id = ?2 AND status = ?3";

        let row = sqlx::query(sql)
            .bind(event_id.to_string())
            .bind(subscription_id.to_string())
            .bind(STATUS_DELIVERED)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    async fn failed_jobs(&self, limit: u32) -> Result<Vec<FailedDelivery>> {
        let sql = "SELECT event_id, subscription_id, attempts, error, completed_at \
                   FROM notification_deliveries \
                   WHERE status = ?1 \
                   ORDER BY completed_at DESC \
                   LIMIT ?2";

        let rows = sqlx::query(sql)
            .bind(STATUS_FAILED)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        let mut failed = Vec::with_capacity(rows.len());
        for row in rows {
            let event_id: String = row.try_get("event_id")?;
            let subscription_id: String = row.try_get("subscription_id")?;
            let attempts: i64 = row.try_get("attempts")?;
            let error: Option<String> = row.try_get("error")?;
            let completed_at: String = row.try_get("completed_at")?;
            failed.push(FailedDelivery {
                event_id: super::parse_uuid(&event_id)?,
                subscription_id: super::parse_uuid(&subscription_id)?,
                attempts: attempts as u32,
                error: error.unwrap_or_default(),
                failed_at: parse_ts(&completed_at)?,
            });
        }
        Ok(failed)
    }

    async fn missing_deliveries(
        &self,
        limit: u32,
    ) -> Result<Vec<(TrackingEvent, Subscription)>> {
        // Pairs with any completion record (delivered or failed) are
        // settled; the sweeper only recovers pairs that were never seen
        // through, which is what post-commit emit loss looks like.
        let sql = "SELECT e.*, \
                   s.subscription_id AS sub_id, s.subscriber_id AS sub_subscriber, \
                   s.method AS sub_method, s.endpoint AS sub_endpoint, \
                   s.milestone AS sub_milestone, s.exception AS sub_exception, \
                   s.location_updates AS sub_location_updates, \
                   s.all_events AS sub_all_events, s.active AS sub_active, \
                   s.created_at AS sub_created_at \
                   FROM events e \
                   JOIN subscriptions s \
                     ON s.shipment_id = e.shipment_id AND s.active = 1 \
                   WHERE e.notification_sent = 0 \
                   AND NOT EXISTS (SELECT 1 FROM notification_deliveries d \
                                   WHERE d.event_id = e.event_id \
                                   AND d.subscription_id = s.subscription_id) \
                   ORDER BY e.created_at \
                   LIMIT ?1";

        let rows = sqlx::query(sql)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        let mut pairs = Vec::new();
        for row in rows {
            let event = event_from_row(&row)?;

            let subscription_id: String = row.try_get("sub_id")?;
            let subscriber_id: String = row.try_get("sub_subscriber")?;
            let method: String = row.try_get("sub_method")?;
            let created_at: String = row.try_get("sub_created_at")?;
            let subscription = Subscription {
                subscription_id: super::parse_uuid(&subscription_id)?,
                shipment_id: event.shipment_id,
                subscriber_id: super::parse_uuid(&subscriber_id)?,
                method: method
                    .parse()
                    .map_err(crate::storage::StorageError::InvalidRow)?,
                endpoint: row.try_get("sub_endpoint")?,
                milestone: row.try_get("sub_milestone")?,
                exception: row.try_get("sub_exception")?,
                location_updates: row.try_get("sub_location_updates")?,
                all_events: row.try_get("sub_all_events")?,
                active: row.try_get("sub_active")?,
                created_at: parse_ts(&created_at)?,
            };

            // The join is shipment-scoped; the filter flags decide here.
            if subscription.matches(&event) {
                pairs.push((event, subscription));
            }
        }
        Ok(pairs)
    }
}
