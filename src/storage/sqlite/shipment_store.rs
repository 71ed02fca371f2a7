//! SQLite ShipmentStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{Awb, Shipment, ShipmentStatus};
use crate::storage::helpers::{fmt_ts, fmt_ts_opt};
use crate::storage::schema::Shipments;
use crate::storage::{Page, Result, ShipmentStore};

use super::{shipment_from_row, SqliteTrackingStore};

#[async_trait]
impl ShipmentStore for SqliteTrackingStore {
    async fn shipment(&self, shipment_id: Uuid) -> Result<Option<Shipment>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Shipments::Table)
            .and_where(Expr::col(Shipments::ShipmentId).eq(shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(self.pool()).await?;
        row.map(|r| shipment_from_row(&r)).transpose()
    }

    async fn shipment_by_awb(&self, awb: &Awb) -> Result<Option<Shipment>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Shipments::Table)
            .and_where(Expr::col(Shipments::AwbNumber).eq(awb.as_str()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(self.pool()).await?;
        row.map(|r| shipment_from_row(&r)).transpose()
    }

    async fn insert_shipment(&self, shipment: &Shipment) -> Result<()> {
        let sql = Query::insert()
            .into_table(Shipments::Table)
            .columns([
                Shipments::ShipmentId,
                Shipments::AwbNumber,
                Shipments::CustomerId,
                Shipments::Origin,
                Shipments::Destination,
                Shipments::Route,
                Shipments::FlightNumber,
                Shipments::FlightDate,
                Shipments::Pieces,
                Shipments::WeightKg,
                Shipments::VolumeM3,
                Shipments::Commodity,
                Shipments::DeclaredValue,
                Shipments::Currency,
                Shipments::CurrentStatus,
                Shipments::CurrentLocation,
                Shipments::PickupDate,
                Shipments::DeliveryDate,
                Shipments::EstimatedDeliveryDate,
                Shipments::HasExceptions,
                Shipments::TrackingEnabled,
                Shipments::TrackingFrequencyMinutes,
                Shipments::LastTrackedAt,
                Shipments::CreatedAt,
            ])
            .values_panic([
                shipment.shipment_id.to_string().into(),
                shipment.awb.as_str().into(),
                shipment.customer_id.to_string().into(),
                shipment.origin.clone().into(),
                shipment.destination.clone().into(),
                serde_json::to_string(&shipment.route)?.into(),
                shipment.flight_number.clone().into(),
                shipment.flight_date.map(|d| d.to_string()).into(),
                shipment.pieces.into(),
                shipment.weight_kg.into(),
                shipment.volume_m3.into(),
                shipment.commodity.clone().into(),
                shipment.declared_value.into(),
                shipment.currency.clone().into(),
                shipment.current_status.as_str().into(),
                shipment.current_location.clone().into(),
                fmt_ts_opt(shipment.pickup_date).into(),
                fmt_ts_opt(shipment.delivery_date).into(),
                fmt_ts_opt(shipment.estimated_delivery_date).into(),
                shipment.has_exceptions.into(),
                shipment.tracking_enabled.into(),
                shipment.tracking_frequency_minutes.into(),
                fmt_ts_opt(shipment.last_tracked_at).into(),
                fmt_ts(shipment.created_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }

    async fn shipments_for_customer(
        &self,
        customer_id: Uuid,
        page: Page,
    ) -> Result<Vec<Shipment>> {
        let sql = Query::select()
            .expr(Expr::cust("*"))
            .from(Shipments::Table)
            .and_where(Expr::col(Shipments::CustomerId).eq(customer_id.to_string()))
            .order_by(Shipments::CreatedAt, Order::Desc)
            .limit(page.limit as u64)
            .offset(page.offset as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        let mut shipments = Vec::with_capacity(rows.len());
        for row in rows {
            shipments.push(shipment_from_row(&row)?);
        }
        Ok(shipments)
    }

    async fn customer_shipment_count(&self, customer_id: Uuid) -> Result<u64> {
        let sql = Query::select()
            .expr(Expr::col(Shipments::ShipmentId).count())
            .from(Shipments::Table)
            .and_where(Expr::col(Shipments::CustomerId).eq(customer_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_one(self.pool()).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn due_for_poll(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Shipment>> {
        // Due-ness depends on each row's own frequency, so the window
        // arithmetic happens in SQL. Terminal shipments never qualify.
        let sql = "SELECT * FROM shipments \
                   WHERE tracking_enabled = 1 \
                   AND current_status NOT IN ('DELIVERED', 'CANCELLED') \
                   AND (last_tracked_at IS NULL \
                        OR julianday(?1) - julianday(last_tracked_at) \
                           >= tracking_frequency_minutes / 1440.0) \
                   ORDER BY last_tracked_at IS NOT NULL, last_tracked_at \
                   LIMIT ?2";

        let rows = sqlx::query(sql)
            .bind(fmt_ts(now))
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await?;

        let mut shipments = Vec::with_capacity(rows.len());
        for row in rows {
            shipments.push(shipment_from_row(&row)?);
        }
        Ok(shipments)
    }

    async fn touch_last_tracked(
        &self,
        shipment_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<()> {
        if shipment_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = shipment_ids.iter().map(Uuid::to_string).collect();
        let sql = Query::update()
            .table(Shipments::Table)
            .values([(Shipments::LastTrackedAt, fmt_ts(at).into())])
            .and_where(Expr::col(Shipments::ShipmentId).is_in(ids))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }

    async fn set_tracking_enabled(&self, shipment_id: Uuid, enabled: bool) -> Result<()> {
        let sql = Query::update()
            .table(Shipments::Table)
            .values([(Shipments::TrackingEnabled, enabled.into())])
            .and_where(Expr::col(Shipments::ShipmentId).eq(shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }

    async fn cancel_shipment(&self, shipment_id: Uuid) -> Result<()> {
        let sql = Query::update()
            .table(Shipments::Table)
            .values([
                (
                    Shipments::CurrentStatus,
                    ShipmentStatus::Cancelled.as_str().into(),
                ),
                (Shipments::TrackingEnabled, false.into()),
                (Shipments::EstimatedDeliveryDate, Option::<String>::None.into()),
            ])
            .and_where(Expr::col(Shipments::ShipmentId).eq(shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&sql).execute(self.pool()).await?;
        Ok(())
    }
}
