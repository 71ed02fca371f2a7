//! SQLite EventStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::TrackingEvent;
use crate::storage::helpers::fmt_ts;
use crate::storage::schema::Events;
use crate::storage::{
    DuplicateProbe, EventFilter, EventStatistics, EventStore, Page, Result,
};

use super::{duplicate_probe_from_row, event_from_row, SqliteTrackingStore};

#[async_trait]
impl EventStore for SqliteTrackingStore {
    async fn events_for_shipment(
        &self,
        shipment_id: Uuid,
        filter: &EventFilter,
        page: Page,
    ) -> Result<Vec<TrackingEvent>> {
        let sql = {
            let mut query = Query::select()
                .expr(Expr::cust("*"))
                .from(Events::Table)
                .and_where(Expr::col(Events::ShipmentId).eq(shipment_id.to_string()))
                .order_by(Events::EventDatetime, Order::Asc)
                .order_by(Events::CreatedAt, Order::Asc)
                .limit(page.limit as u64)
                .offset(page.offset as u64)
                .to_owned();

            if let Some(category) = filter.category {
                query.and_where(Expr::col(Events::Category).eq(category.as_str()));
            }
            if filter.milestones_only {
                query.and_where(Expr::col(Events::IsMilestone).eq(true));
            }
            if filter.exceptions_only {
                query.and_where(Expr::col(Events::IsException).eq(true));
            }
            if filter.customer_visible_only {
                query.and_where(Expr::col(Events::CustomerVisible).eq(true));
            }

            query.to_string(SqliteQueryBuilder)
        };
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }

    async fn recent_events(&self, shipment_id: Uuid, limit: u32) -> Result<Vec<TrackingEvent>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Events::Table)
            .and_where(Expr::col(Events::ShipmentId).eq(shipment_id.to_string()))
            .order_by(Events::EventDatetime, Order::Desc)
            .order_by(Events::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }

    async fn find_duplicates(
        &self,
        shipment_id: Uuid,
        code: &str,
        around: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<DuplicateProbe>> {
        let sql = Query::select()
            .columns([Events::EventId, Events::ExternalId, Events::SourceId])
            .from(Events::Table)
            .and_where(Expr::col(Events::ShipmentId).eq(shipment_id.to_string()))
            .and_where(Expr::col(Events::EventCode).eq(code))
            .and_where(Expr::col(Events::EventDatetime).gt(fmt_ts(around - window)))
            .and_where(Expr::col(Events::EventDatetime).lt(fmt_ts(around + window)))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        let mut probes = Vec::with_capacity(rows.len());
        for row in rows {
            probes.push(duplicate_probe_from_row(&row)?);
        }
        Ok(probes)
    }

    async fn by_external_id(&self, external_id: &str) -> Result<Vec<TrackingEvent>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Events::Table)
            .and_where(Expr::col(Events::ExternalId).eq(external_id))
            .order_by(Events::EventDatetime, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(event_from_row(&row)?);
        }
        Ok(events)
    }

    async fn statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EventStatistics> {
        let sql = "SELECT COUNT(*) AS total, \
                   SUM(is_milestone) AS milestones, \
                   SUM(is_exception) AS exceptions, \
                   SUM(is_critical) AS critical, \
                   SUM(customer_visible) AS customer_visible, \
                   SUM(notification_sent) AS notifications_sent \
                   FROM events WHERE event_datetime >= ?1 AND event_datetime < ?2";

        let row = sqlx::query(sql)
            .bind(fmt_ts(from))
            .bind(fmt_ts(to))
            .fetch_one(self.pool())
            .await?;

        let total: i64 = row.try_get("total")?;
        let as_count = |value: Option<i64>| value.unwrap_or(0) as u64;

        Ok(EventStatistics {
            total: total as u64,
            milestones: as_count(row.try_get("milestones")?),
            exceptions: as_count(row.try_get("exceptions")?),
            critical: as_count(row.try_get("critical")?),
            customer_visible: as_count(row.try_get("customer_visible")?),
            notifications_sent: as_count(row.try_get("notifications_sent")?),
        })
    }

    async fn mark_notification_sent(&self, event_id: Uuid) -> Result<()> {
        let sql = Query::update()
            .table(Events::Table)
            .values([(Events::NotificationSent, true.into())])
            .and_where(Expr::col(Events::EventId).eq(event_id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }

    async fn event_count(&self, shipment_id: Uuid) -> Result<u64> {
        let sql = Query::select()
            .expr(Expr::col(Events::EventId).count())
            .from(Events::Table)
            .and_where(Expr::col(Events::ShipmentId).eq(shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_one(self.pool()).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }
}
