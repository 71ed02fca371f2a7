//! Database schema definitions using sea-query.
//!
//! Table and column identifiers for type-safe query building, plus the
//! DDL applied by `ensure_schema`.

use sea_query::Iden;

/// Tracking events table schema.
#[derive(Iden)]
pub enum Events {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "shipment_id"]
    ShipmentId,
    #[iden = "event_code"]
    EventCode,
    #[iden = "description"]
    Description,
    #[iden = "category"]
    Category,
    #[iden = "location_name"]
    LocationName,
    #[iden = "location_country"]
    LocationCountry,
    #[iden = "location_city"]
    LocationCity,
    #[iden = "airport_code"]
    AirportCode,
    #[iden = "latitude"]
    Latitude,
    #[iden = "longitude"]
    Longitude,
    #[iden = "event_datetime"]
    EventDatetime,
    #[iden = "original_timezone"]
    OriginalTimezone,
    #[iden = "is_milestone"]
    IsMilestone,
    #[iden = "is_exception"]
    IsException,
    #[iden = "is_critical"]
    IsCritical,
    #[iden = "severity"]
    Severity,
    #[iden = "source_id"]
    SourceId,
    #[iden = "external_id"]
    ExternalId,
    #[iden = "reference"]
    Reference,
    #[iden = "temperature_celsius"]
    TemperatureCelsius,
    #[iden = "humidity_percent"]
    HumidityPercent,
    #[iden = "additional_info"]
    AdditionalInfo,
    #[iden = "customer_visible"]
    CustomerVisible,
    #[iden = "processed"]
    Processed,
    #[iden = "notification_sent"]
    NotificationSent,
    #[iden = "created_at"]
    CreatedAt,
}

/// Shipments table schema.
#[derive(Iden)]
pub enum Shipments {
    Table,
    #[iden = "shipment_id"]
    ShipmentId,
    #[iden = "awb_number"]
    AwbNumber,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "origin"]
    Origin,
    #[iden = "destination"]
    Destination,
    #[iden = "route"]
    Route,
    #[iden = "flight_number"]
    FlightNumber,
    #[iden = "flight_date"]
    FlightDate,
    #[iden = "pieces"]
    Pieces,
    #[iden = "weight_kg"]
    WeightKg,
    #[iden = "volume_m3"]
    VolumeM3,
    #[iden = "commodity"]
    Commodity,
    #[iden = "declared_value"]
    DeclaredValue,
    #[iden = "currency"]
    Currency,
    #[iden = "current_status"]
    CurrentStatus,
    #[iden = "current_location"]
    CurrentLocation,
    #[iden = "pickup_date"]
    PickupDate,
    #[iden = "delivery_date"]
    DeliveryDate,
    #[iden = "estimated_delivery_date"]
    EstimatedDeliveryDate,
    #[iden = "has_exceptions"]
    HasExceptions,
    #[iden = "tracking_enabled"]
    TrackingEnabled,
    #[iden = "tracking_frequency_minutes"]
    TrackingFrequencyMinutes,
    #[iden = "last_tracked_at"]
    LastTrackedAt,
    #[iden = "created_at"]
    CreatedAt,
}

/// Subscriptions table schema.
#[derive(Iden)]
pub enum Subscriptions {
    Table,
    #[iden = "subscription_id"]
    SubscriptionId,
    #[iden = "shipment_id"]
    ShipmentId,
    #[iden = "subscriber_id"]
    SubscriberId,
    #[iden = "method"]
    Method,
    #[iden = "endpoint"]
    Endpoint,
    #[iden = "milestone"]
    Milestone,
    #[iden = "exception"]
    Exception,
    #[iden = "location_updates"]
    LocationUpdates,
    #[iden = "all_events"]
    AllEvents,
    #[iden = "active"]
    Active,
    #[iden = "created_at"]
    CreatedAt,
}

/// Sources reference table schema.
#[derive(Iden)]
pub enum Sources {
    Table,
    #[iden = "source_id"]
    SourceId,
    #[iden = "name"]
    Name,
    #[iden = "source_type"]
    SourceType,
    #[iden = "priority"]
    Priority,
    #[iden = "active"]
    Active,
}

/// Milestone catalog reference table schema.
#[derive(Iden)]
pub enum Milestones {
    Table,
    #[iden = "code"]
    Code,
    #[iden = "name"]
    Name,
    #[iden = "category"]
    Category,
    #[iden = "sequence"]
    Sequence,
    #[iden = "critical"]
    Critical,
    #[iden = "expected_duration_minutes"]
    ExpectedDurationMinutes,
    #[iden = "sla_threshold_minutes"]
    SlaThresholdMinutes,
}

/// Per-(event, subscription) delivery record schema.
#[derive(Iden)]
pub enum NotificationDeliveries {
    Table,
    #[iden = "event_id"]
    EventId,
    #[iden = "subscription_id"]
    SubscriptionId,
    #[iden = "status"]
    Status,
    #[iden = "attempts"]
    Attempts,
    #[iden = "error"]
    Error,
    #[iden = "completed_at"]
    CompletedAt,
}

/// SQL for creating the shipments table.
pub const CREATE_SHIPMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS shipments (
    shipment_id TEXT PRIMARY KEY,
    awb_number TEXT NOT NULL UNIQUE,
    customer_id TEXT NOT NULL,
    origin TEXT NOT NULL,
    destination TEXT NOT NULL,
    route TEXT NOT NULL DEFAULT '[]',
    flight_number TEXT,
    flight_date TEXT,
    pieces INTEGER NOT NULL,
    weight_kg REAL NOT NULL,
    volume_m3 REAL,
    commodity TEXT NOT NULL DEFAULT '',
    declared_value REAL,
    currency TEXT,
    current_status TEXT NOT NULL,
    current_location TEXT,
    pickup_date TEXT,
    delivery_date TEXT,
    estimated_delivery_date TEXT,
    has_exceptions INTEGER NOT NULL DEFAULT 0,
    tracking_enabled INTEGER NOT NULL DEFAULT 1,
    tracking_frequency_minutes INTEGER NOT NULL,
    last_tracked_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_shipments_customer ON shipments(customer_id);
CREATE INDEX IF NOT EXISTS idx_shipments_poll
    ON shipments(tracking_enabled, current_status, last_tracked_at);
"#;

/// SQL for creating the events table.
///
/// The expression unique index backs the idempotent append: external-id
/// duplicates collide outright, and id-less rows fall back to the
/// event_id coalesce so the time-window probe stays authoritative.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    shipment_id TEXT NOT NULL REFERENCES shipments(shipment_id),
    event_code TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL,
    location_name TEXT,
    location_country TEXT,
    location_city TEXT,
    airport_code TEXT,
    latitude REAL,
    longitude REAL,
    event_datetime TEXT NOT NULL,
    original_timezone TEXT NOT NULL DEFAULT 'UTC',
    is_milestone INTEGER NOT NULL DEFAULT 0,
    is_exception INTEGER NOT NULL DEFAULT 0,
    is_critical INTEGER NOT NULL DEFAULT 0,
    severity TEXT NOT NULL DEFAULT 'INFO',
    source_id TEXT NOT NULL,
    external_id TEXT,
    reference TEXT,
    temperature_celsius REAL,
    humidity_percent REAL,
    additional_info TEXT,
    customer_visible INTEGER NOT NULL DEFAULT 1,
    processed INTEGER NOT NULL DEFAULT 1,
    notification_sent INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_shipment_time
    ON events(shipment_id, event_datetime, created_at);
CREATE INDEX IF NOT EXISTS idx_events_external ON events(external_id)
    WHERE external_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_events_pending_notification
    ON events(notification_sent) WHERE notification_sent = 0;
CREATE UNIQUE INDEX IF NOT EXISTS uq_events_logical
    ON events(shipment_id, event_code, event_datetime,
              coalesce(external_id, event_id));
"#;

/// SQL for creating the subscriptions table.
pub const CREATE_SUBSCRIPTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id TEXT PRIMARY KEY,
    shipment_id TEXT NOT NULL REFERENCES shipments(shipment_id),
    subscriber_id TEXT NOT NULL,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    milestone INTEGER NOT NULL DEFAULT 0,
    exception INTEGER NOT NULL DEFAULT 0,
    location_updates INTEGER NOT NULL DEFAULT 0,
    all_events INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (shipment_id, subscriber_id, method)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_shipment
    ON subscriptions(shipment_id) WHERE active = 1;
"#;

/// SQL for creating the sources reference table.
pub const CREATE_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    source_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source_type TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);
"#;

/// SQL for creating the milestone catalog reference table.
pub const CREATE_MILESTONES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS milestones (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    critical INTEGER NOT NULL DEFAULT 0,
    expected_duration_minutes INTEGER NOT NULL DEFAULT 0,
    sla_threshold_minutes INTEGER NOT NULL DEFAULT 0
);
"#;

/// SQL for creating the delivery record table.
pub const CREATE_NOTIFICATION_DELIVERIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notification_deliveries (
    event_id TEXT NOT NULL REFERENCES events(event_id),
    subscription_id TEXT NOT NULL REFERENCES subscriptions(subscription_id),
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (event_id, subscription_id)
);
"#;
