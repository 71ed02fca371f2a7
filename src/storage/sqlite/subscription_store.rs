//! SQLite SubscriptionStore and SourceStore implementations.

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Query, SqliteQueryBuilder};
use uuid::Uuid;

use crate::domain::{NewSubscription, Source, SourceType, Subscription};
use crate::storage::helpers::fmt_ts;
use crate::storage::schema::{Sources, Subscriptions};
use crate::storage::{Result, SourceStore, StorageError, SubscriptionStore};

use super::{source_from_row, subscription_from_row, SqliteTrackingStore};

#[async_trait]
impl SubscriptionStore for SqliteTrackingStore {
    async fn upsert_subscription(&self, request: &NewSubscription) -> Result<Subscription> {
        // Re-subscribing on the same (shipment, subscriber, method) key
        // reactivates and refreshes the endpoint and filter flags.
        let sql = "INSERT INTO subscriptions \
                   (subscription_id, shipment_id, subscriber_id, method, endpoint, \
                    milestone, exception, location_updates, all_events, active, created_at) \
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10) \
                   ON CONFLICT (shipment_id, subscriber_id, method) DO UPDATE SET \
                   endpoint = excluded.endpoint, \
                   milestone = excluded.milestone, \
                   exception = excluded.exception, \
                   location_updates = excluded.location_updates, \
                   all_events = excluded.all_events, \
                   active = 1";

        sqlx::query(sql)
            .bind(Uuid::new_v4().to_string())
            .bind(request.shipment_id.to_string())
            .bind(request.subscriber_id.to_string())
            .bind(request.method.as_str())
            .bind(&request.endpoint)
            .bind(request.milestone)
            .bind(request.exception)
            .bind(request.location_updates)
            .bind(request.all_events)
            .bind(fmt_ts(Utc::now()))
            .execute(self.pool())
            .await?;

        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Subscriptions::Table)
            .and_where(Expr::col(Subscriptions::ShipmentId).eq(request.shipment_id.to_string()))
            .and_where(
                Expr::col(Subscriptions::SubscriberId).eq(request.subscriber_id.to_string()),
            )
            .and_where(Expr::col(Subscriptions::Method).eq(request.method.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StorageError::NotFound {
                entity: "subscription",
            })?;
        subscription_from_row(&row)
    }

    async fn subscription(&self, subscription_id: Uuid) -> Result<Option<Subscription>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Subscriptions::Table)
            .and_where(
                Expr::col(Subscriptions::SubscriptionId).eq(subscription_id.to_string()),
            )
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(self.pool()).await?;
        row.map(|r| subscription_from_row(&r)).transpose()
    }

    async fn active_for_shipment(&self, shipment_id: Uuid) -> Result<Vec<Subscription>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Subscriptions::Table)
            .and_where(Expr::col(Subscriptions::ShipmentId).eq(shipment_id.to_string()))
            .and_where(Expr::col(Subscriptions::Active).eq(true))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            subscriptions.push(subscription_from_row(&row)?);
        }
        Ok(subscriptions)
    }

    async fn deactivate_subscription(&self, subscription_id: Uuid) -> Result<()> {
        let sql = Query::update()
            .table(Subscriptions::Table)
            .values([(Subscriptions::Active, false.into())])
            .and_where(
                Expr::col(Subscriptions::SubscriptionId).eq(subscription_id.to_string()),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }

    async fn deactivate_for_subscriber(&self, subscriber_id: Uuid) -> Result<u64> {
        let sql = Query::update()
            .table(Subscriptions::Table)
            .values([(Subscriptions::Active, false.into())])
            .and_where(Expr::col(Subscriptions::SubscriberId).eq(subscriber_id.to_string()))
            .and_where(Expr::col(Subscriptions::Active).eq(true))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(self.pool()).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SourceStore for SqliteTrackingStore {
    async fn source(&self, source_id: Uuid) -> Result<Option<Source>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Sources::Table)
            .and_where(Expr::col(Sources::SourceId).eq(source_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(self.pool()).await?;
        row.map(|r| source_from_row(&r)).transpose()
    }

    async fn source_by_type(&self, source_type: SourceType) -> Result<Option<Source>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Sources::Table)
            .and_where(Expr::col(Sources::SourceType).eq(source_type.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(self.pool()).await?;
        row.map(|r| source_from_row(&r)).transpose()
    }

    async fn sources(&self) -> Result<Vec<Source>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Sources::Table)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            sources.push(source_from_row(&row)?);
        }
        Ok(sources)
    }
}
