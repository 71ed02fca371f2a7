//! SQLite implementation of the tracking store.
//!
//! All statements are built with sea-query and executed through a shared
//! `SqlitePool`. The apply transaction uses `BEGIN IMMEDIATE` to take the
//! write lock upfront, preventing deadlocks when concurrent DEFERRED
//! transactions race to upgrade from shared to exclusive.

mod delivery_store;
mod event_store;
mod shipment_store;
mod subscription_store;

use async_trait::async_trait;
use chrono::Duration;
use sea_query::{Expr, Query, SqliteQueryBuilder};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    derive_state, Awb, EventLocation, Milestone, Shipment, Source, SourceRef, Subscription,
    TrackingEvent, MILESTONE_CATALOG,
};
use crate::storage::helpers::{fmt_ts, fmt_ts_opt, parse_ts, parse_ts_opt};
use crate::storage::schema::{Events, Milestones, Shipments, Sources, Subscriptions};
use crate::storage::{CommitOutcome, DuplicateProbe, Result, StorageError, TrackingStore};

use super::external_id_matches;

/// Dedup window half-width applied inside the commit transaction.
const DEDUP_WINDOW_SECONDS: i64 = 300;

/// SQLite-backed tracking store.
pub struct SqliteTrackingStore {
    pool: SqlitePool,
}

impl SqliteTrackingStore {
    /// Connect to the given sqlite URL.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        // In-memory databases exist per connection; a pool wider than one
        // would hand out empty databases.
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and seed the reference data. Idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        use crate::storage::schema;

        for ddl in [
            schema::CREATE_SHIPMENTS_TABLE,
            schema::CREATE_EVENTS_TABLE,
            schema::CREATE_SUBSCRIPTIONS_TABLE,
            schema::CREATE_SOURCES_TABLE,
            schema::CREATE_MILESTONES_TABLE,
            schema::CREATE_NOTIFICATION_DELIVERIES_TABLE,
        ] {
            // Each DDL block holds several statements; execute one at a time.
            for statement in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }

        self.seed_sources().await?;
        self.seed_milestones().await?;

        info!("sqlite schema ready");
        Ok(())
    }

    async fn seed_sources(&self) -> Result<()> {
        for source in Source::seed_rows() {
            let query = Query::insert()
                .into_table(Sources::Table)
                .columns([
                    Sources::SourceId,
                    Sources::Name,
                    Sources::SourceType,
                    Sources::Priority,
                    Sources::Active,
                ])
                .values_panic([
                    source.source_id.to_string().into(),
                    source.name.clone().into(),
                    source.source_type.as_str().into(),
                    source.priority.into(),
                    source.active.into(),
                ])
                .to_string(SqliteQueryBuilder);

            // Reference rows are fixed; re-runs must not duplicate them.
            let query = query.replacen("INSERT", "INSERT OR IGNORE", 1);
            sqlx::query(&query).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Every catalog row lands in the one `milestones` table.
    async fn seed_milestones(&self) -> Result<()> {
        for milestone in MILESTONE_CATALOG {
            let query = Query::insert()
                .into_table(Milestones::Table)
                .columns([
                    Milestones::Code,
                    Milestones::Name,
                    Milestones::Category,
                    Milestones::Sequence,
                    Milestones::Critical,
                    Milestones::ExpectedDurationMinutes,
                    Milestones::SlaThresholdMinutes,
                ])
                .values_panic([
                    milestone.code.into(),
                    milestone.name.into(),
                    milestone.category.as_str().into(),
                    milestone.sequence.into(),
                    milestone.critical.into(),
                    milestone.expected_duration_minutes.into(),
                    milestone.sla_threshold_minutes.into(),
                ])
                .to_string(SqliteQueryBuilder);

            let query = query.replacen("INSERT", "INSERT OR IGNORE", 1);
            sqlx::query(&query).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Milestone catalog as stored (reconciliation/debugging surface).
    pub async fn milestones(&self) -> Result<Vec<Milestone>> {
        let query = Query::select()
            .column(Milestones::Code)
            .from(Milestones::Table)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut catalog = Vec::with_capacity(rows.len());
        for row in rows {
            let code: String = row.try_get("code")?;
            if let Some(entry) = crate::domain::milestone_for_code(&code) {
                catalog.push(entry.clone());
            }
        }
        Ok(catalog)
    }

    /// Insert the event and refresh the derived shipment fields inside an
    /// already-started transaction. Returns `Duplicate` when the in-window
    /// probe matches.
    async fn apply_in_txn(
        conn: &mut SqliteConnection,
        event: &TrackingEvent,
    ) -> Result<CommitOutcome> {
        // Authoritative duplicate re-check under the write lock.
        let window = Duration::seconds(DEDUP_WINDOW_SECONDS);
        let query = Query::select()
            .columns([Events::EventId, Events::ExternalId, Events::SourceId])
            .from(Events::Table)
            .and_where(Expr::col(Events::ShipmentId).eq(event.shipment_id.to_string()))
            .and_where(Expr::col(Events::EventCode).eq(event.code.clone()))
            .and_where(Expr::col(Events::EventDatetime).gt(fmt_ts(event.event_datetime - window)))
            .and_where(Expr::col(Events::EventDatetime).lt(fmt_ts(event.event_datetime + window)))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        for row in rows {
            let probe = duplicate_probe_from_row(&row)?;
            if external_id_matches(
                event.source.external_id.as_deref(),
                probe.external_id.as_deref(),
            ) {
                debug!(event_id = %probe.event_id, "apply hit persisted duplicate");
                return Ok(CommitOutcome::Duplicate);
            }
        }

        let insert = insert_event_stmt(event);
        sqlx::query(&insert).execute(&mut *conn).await?;

        // Rederive from every persisted event, the new one included.
        let query = Query::select()
            .expr(Expr::cust("*"))
            .from(Events::Table)
            .and_where(Expr::col(Events::ShipmentId).eq(event.shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(event_from_row(&row)?);
        }
        let derived = derive_state(&events);

        let query = Query::select()
            .expr(Expr::cust("*"))
            .from(Shipments::Table)
            .and_where(Expr::col(Shipments::ShipmentId).eq(event.shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(StorageError::NotFound {
                entity: "shipment",
            })?;
        let mut shipment = shipment_from_row(&row)?;

        shipment.current_status = derived.status;
        shipment.current_location = derived
            .location
            .clone()
            .or(shipment.current_location.take());
        shipment.delivery_date = derived.delivery_date;
        shipment.estimated_delivery_date =
            derived.merged_estimate(shipment.estimated_delivery_date);
        shipment.has_exceptions = derived.has_exceptions;

        let update = Query::update()
            .table(Shipments::Table)
            .values([
                (
                    Shipments::CurrentStatus,
                    shipment.current_status.as_str().into(),
                ),
                (
                    Shipments::CurrentLocation,
                    shipment.current_location.clone().into(),
                ),
                (
                    Shipments::DeliveryDate,
                    fmt_ts_opt(shipment.delivery_date).into(),
                ),
                (
                    Shipments::EstimatedDeliveryDate,
                    fmt_ts_opt(shipment.estimated_delivery_date).into(),
                ),
                (Shipments::HasExceptions, shipment.has_exceptions.into()),
            ])
            .and_where(Expr::col(Shipments::ShipmentId).eq(event.shipment_id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&update).execute(&mut *conn).await?;

        Ok(CommitOutcome::Committed(shipment))
    }
}

#[async_trait]
impl TrackingStore for SqliteTrackingStore {
    async fn commit_applied(&self, event: &TrackingEvent) -> Result<CommitOutcome> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::apply_in_txn(&mut conn, event).await;

        match result {
            Ok(outcome) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ============================================================================
// Row mapping
// ============================================================================

pub(super) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StorageError::InvalidRow(format!("bad uuid {raw:?}: {e}")))
}

pub(super) fn duplicate_probe_from_row(row: &SqliteRow) -> Result<DuplicateProbe> {
    let event_id: String = row.try_get("event_id")?;
    let external_id: Option<String> = row.try_get("external_id")?;
    let source_id: String = row.try_get("source_id")?;
    Ok(DuplicateProbe {
        event_id: parse_uuid(&event_id)?,
        external_id,
        source_id: parse_uuid(&source_id)?,
    })
}

pub(super) fn event_from_row(row: &SqliteRow) -> Result<TrackingEvent> {
    let event_id: String = row.try_get("event_id")?;
    let shipment_id: String = row.try_get("shipment_id")?;
    let category: String = row.try_get("category")?;
    let severity: String = row.try_get("severity")?;
    let source_id: String = row.try_get("source_id")?;
    let event_datetime: String = row.try_get("event_datetime")?;
    let created_at: String = row.try_get("created_at")?;
    let additional_info: Option<String> = row.try_get("additional_info")?;

    Ok(TrackingEvent {
        event_id: parse_uuid(&event_id)?,
        shipment_id: parse_uuid(&shipment_id)?,
        code: row.try_get("event_code")?,
        description: row.try_get("description")?,
        category: category.parse().map_err(StorageError::InvalidRow)?,
        location: EventLocation {
            name: row.try_get("location_name")?,
            country: row.try_get("location_country")?,
            city: row.try_get("location_city")?,
            airport_code: row.try_get("airport_code")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
        },
        event_datetime: parse_ts(&event_datetime)?,
        original_timezone: row.try_get("original_timezone")?,
        is_milestone: row.try_get("is_milestone")?,
        is_exception: row.try_get("is_exception")?,
        is_critical: row.try_get("is_critical")?,
        severity: severity.parse().map_err(StorageError::InvalidRow)?,
        source: SourceRef {
            source_id: parse_uuid(&source_id)?,
            external_id: row.try_get("external_id")?,
            reference: row.try_get("reference")?,
        },
        temperature_celsius: row.try_get("temperature_celsius")?,
        humidity_percent: row.try_get("humidity_percent")?,
        additional_info: additional_info
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        customer_visible: row.try_get("customer_visible")?,
        processed: row.try_get("processed")?,
        notification_sent: row.try_get("notification_sent")?,
        created_at: parse_ts(&created_at)?,
    })
}

pub(super) fn shipment_from_row(row: &SqliteRow) -> Result<Shipment> {
    let shipment_id: String = row.try_get("shipment_id")?;
    let awb: String = row.try_get("awb_number")?;
    let customer_id: String = row.try_get("customer_id")?;
    let route: String = row.try_get("route")?;
    let flight_date: Option<String> = row.try_get("flight_date")?;
    let status: String = row.try_get("current_status")?;
    let pieces: i64 = row.try_get("pieces")?;
    let frequency: i64 = row.try_get("tracking_frequency_minutes")?;
    let pickup_date: Option<String> = row.try_get("pickup_date")?;
    let delivery_date: Option<String> = row.try_get("delivery_date")?;
    let estimated: Option<String> = row.try_get("estimated_delivery_date")?;
    let last_tracked_at: Option<String> = row.try_get("last_tracked_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Shipment {
        shipment_id: parse_uuid(&shipment_id)?,
        awb: Awb::new(&awb).map_err(|e| StorageError::InvalidRow(e.to_string()))?,
        customer_id: parse_uuid(&customer_id)?,
        origin: row.try_get("origin")?,
        destination: row.try_get("destination")?,
        route: serde_json::from_str(&route)?,
        flight_number: row.try_get("flight_number")?,
        flight_date: flight_date
            .map(|raw| {
                raw.parse()
                    .map_err(|e| StorageError::InvalidRow(format!("bad flight_date: {e}")))
            })
            .transpose()?,
        pieces: pieces as u32,
        weight_kg: row.try_get("weight_kg")?,
        volume_m3: row.try_get("volume_m3")?,
        commodity: row.try_get("commodity")?,
        declared_value: row.try_get("declared_value")?,
        currency: row.try_get("currency")?,
        current_status: status.parse().map_err(StorageError::InvalidRow)?,
        current_location: row.try_get("current_location")?,
        pickup_date: parse_ts_opt(pickup_date)?,
        delivery_date: parse_ts_opt(delivery_date)?,
        estimated_delivery_date: parse_ts_opt(estimated)?,
        has_exceptions: row.try_get("has_exceptions")?,
        tracking_enabled: row.try_get("tracking_enabled")?,
        tracking_frequency_minutes: frequency as u32,
        last_tracked_at: parse_ts_opt(last_tracked_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

pub(super) fn subscription_from_row(row: &SqliteRow) -> Result<Subscription> {
    let subscription_id: String = row.try_get("subscription_id")?;
    let shipment_id: String = row.try_get("shipment_id")?;
    let subscriber_id: String = row.try_get("subscriber_id")?;
    let method: String = row.try_get("method")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Subscription {
        subscription_id: parse_uuid(&subscription_id)?,
        shipment_id: parse_uuid(&shipment_id)?,
        subscriber_id: parse_uuid(&subscriber_id)?,
        method: method.parse().map_err(StorageError::InvalidRow)?,
        endpoint: row.try_get("endpoint")?,
        milestone: row.try_get("milestone")?,
        exception: row.try_get("exception")?,
        location_updates: row.try_get("location_updates")?,
        all_events: row.try_get("all_events")?,
        active: row.try_get("active")?,
        created_at: parse_ts(&created_at)?,
    })
}

pub(super) fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let source_id: String = row.try_get("source_id")?;
    let source_type: String = row.try_get("source_type")?;
    Ok(Source {
        source_id: parse_uuid(&source_id)?,
        name: row.try_get("name")?,
        source_type: source_type.parse().map_err(StorageError::InvalidRow)?,
        priority: row.try_get("priority")?,
        active: row.try_get("active")?,
    })
}

pub(super) fn insert_event_stmt(event: &TrackingEvent) -> String {
    Query::insert()
        .into_table(Events::Table)
        .columns([
            Events::EventId,
            Events::ShipmentId,
            Events::EventCode,
            Events::Description,
            Events::Category,
            Events::LocationName,
            Events::LocationCountry,
            Events::LocationCity,
            Events::AirportCode,
            Events::Latitude,
            Events::Longitude,
            Events::EventDatetime,
            Events::OriginalTimezone,
            Events::IsMilestone,
            Events::IsException,
            Events::IsCritical,
            Events::Severity,
            Events::SourceId,
            Events::ExternalId,
            Events::Reference,
            Events::TemperatureCelsius,
            Events::HumidityPercent,
            Events::AdditionalInfo,
            Events::CustomerVisible,
            Events::Processed,
            Events::NotificationSent,
            Events::CreatedAt,
        ])
        .values_panic([
            event.event_id.to_string().into(),
            event.shipment_id.to_string().into(),
            event.code.clone().into(),
            event.description.clone().into(),
            event.category.as_str().into(),
            event.location.name.clone().into(),
            event.location.country.clone().into(),
            event.location.city.clone().into(),
            event.location.airport_code.clone().into(),
            event.location.latitude.into(),
            event.location.longitude.into(),
            fmt_ts(event.event_datetime).into(),
            event.original_timezone.clone().into(),
            event.is_milestone.into(),
            event.is_exception.into(),
            event.is_critical.into(),
            event.severity.as_str().into(),
            event.source.source_id.to_string().into(),
            event.source.external_id.clone().into(),
            event.source.reference.clone().into(),
            event.temperature_celsius.into(),
            event.humidity_percent.into(),
            event
                .additional_info
                .as_ref()
                .map(|v| v.to_string())
                .into(),
            event.customer_visible.into(),
            event.processed.into(),
            event.notification_sent.into(),
            fmt_ts(event.created_at).into(),
        ])
        .to_string(SqliteQueryBuilder)
}
