//! Shipment aggregate and derived snapshot.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Awb;

/// Lifecycle status of a shipment, derived from the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Created,
    Booked,
    Manifested,
    Departed,
    InTransit,
    Arrived,
    CustomsClearance,
    OutForDelivery,
    Delivered,
    Cancelled,
    OnHold,
    Exception,
}

impl ShipmentStatus {
    /// Terminal statuses make the shipment tracking-quiescent: the poll
    /// scheduler never selects it again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Booked => "BOOKED",
            Self::Manifested => "MANIFESTED",
            Self::Departed => "DEPARTED",
            Self::InTransit => "IN_TRANSIT",
            Self::Arrived => "ARRIVED",
            Self::CustomsClearance => "CUSTOMS_CLEARANCE",
            Self::OutForDelivery => "OUT_FOR_DELIVERY",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
            Self::OnHold => "ON_HOLD",
            Self::Exception => "EXCEPTION",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "BOOKED" => Ok(Self::Booked),
            "MANIFESTED" => Ok(Self::Manifested),
            "DEPARTED" => Ok(Self::Departed),
            "IN_TRANSIT" => Ok(Self::InTransit),
            "ARRIVED" => Ok(Self::Arrived),
            "CUSTOMS_CLEARANCE" => Ok(Self::CustomsClearance),
            "OUT_FOR_DELIVERY" => Ok(Self::OutForDelivery),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            "ON_HOLD" => Ok(Self::OnHold),
            "EXCEPTION" => Ok(Self::Exception),
            other => Err(format!("unknown shipment status: {other}")),
        }
    }
}

/// Long-lived shipment aggregate.
///
/// Created by the service-request intake and thereafter mutated only by
/// the ingestion pipeline (derived fields) and administrative operations
/// (cancel, tracking toggle). Nothing is hard-deleted; `Cancelled` is the
/// soft-delete marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: Uuid,
    pub awb: Awb,
    pub customer_id: Uuid,
    /// Origin airport, IATA three-letter code.
    pub origin: String,
    /// Destination airport, IATA three-letter code.
    pub destination: String,
    /// Ordered transit airports between origin and destination.
    pub route: Vec<String>,
    pub flight_number: Option<String>,
    pub flight_date: Option<NaiveDate>,
    pub pieces: u32,
    pub weight_kg: f64,
    pub volume_m3: Option<f64>,
    pub commodity: String,
    pub declared_value: Option<f64>,
    pub currency: Option<String>,
    pub current_status: ShipmentStatus,
    pub current_location: Option<String>,
    pub pickup_date: Option<DateTime<Utc>>,
    /// Set iff the shipment reached `Delivered`, to the event time of the
    /// triggering event.
    pub delivery_date: Option<DateTime<Utc>>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    /// Whether any persisted event for this shipment is an exception.
    pub has_exceptions: bool,
    pub tracking_enabled: bool,
    pub tracking_frequency_minutes: u32,
    pub last_tracked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Shipment {
    /// Quiescent shipments are skipped by the poll scheduler.
    pub fn is_quiescent(&self) -> bool {
        self.current_status.is_terminal()
    }
}

/// Intake request for a new shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShipment {
    pub awb: Awb,
    pub customer_id: Uuid,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub route: Vec<String>,
    pub flight_number: Option<String>,
    pub flight_date: Option<NaiveDate>,
    pub pieces: u32,
    pub weight_kg: f64,
    pub volume_m3: Option<f64>,
    pub commodity: String,
    pub declared_value: Option<f64>,
    pub currency: Option<String>,
    pub pickup_date: Option<DateTime<Utc>>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub tracking_frequency_minutes: Option<u32>,
}

/// Default poll cadence for new shipments, in minutes.
pub const DEFAULT_TRACKING_FREQUENCY_MINUTES: u32 = 60;

impl NewShipment {
    /// Validate intake invariants: positive cargo metrics, IATA codes.
    pub fn validate(&self) -> Result<(), String> {
        if self.pieces < 1 {
            return Err("pieces must be at least 1".to_string());
        }
        if self.weight_kg <= 0.0 {
            return Err("weight_kg must be positive".to_string());
        }
        if let Some(v) = self.volume_m3 {
            if v <= 0.0 {
                return Err("volume_m3 must be positive when present".to_string());
            }
        }
        validate_airport(&self.origin)?;
        validate_airport(&self.destination)?;
        for stop in &self.route {
            validate_airport(stop)?;
        }
        if let Some(freq) = self.tracking_frequency_minutes {
            if freq == 0 {
                return Err("tracking_frequency_minutes must be positive".to_string());
            }
        }
        Ok(())
    }

    /// Materialize the shipment aggregate with derived fields at rest.
    pub fn into_shipment(self, now: DateTime<Utc>) -> Shipment {
        Shipment {
            shipment_id: Uuid::new_v4(),
            awb: self.awb,
            customer_id: self.customer_id,
            origin: self.origin,
            destination: self.destination,
            route: self.route,
            flight_number: self.flight_number,
            flight_date: self.flight_date,
            pieces: self.pieces,
            weight_kg: self.weight_kg,
            volume_m3: self.volume_m3,
            commodity: self.commodity,
            declared_value: self.declared_value,
            currency: self.currency,
            current_status: ShipmentStatus::Created,
            current_location: None,
            pickup_date: self.pickup_date,
            delivery_date: None,
            estimated_delivery_date: self.estimated_delivery_date,
            has_exceptions: false,
            tracking_enabled: true,
            tracking_frequency_minutes: self
                .tracking_frequency_minutes
                .unwrap_or(DEFAULT_TRACKING_FREQUENCY_MINUTES),
            last_tracked_at: None,
            created_at: now,
        }
    }
}

fn validate_airport(code: &str) -> Result<(), String> {
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(format!("invalid airport code: {code}"))
    }
}

/// Compact shipment view carried on bus events and push snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentSnapshot {
    pub shipment_id: Uuid,
    pub awb: Awb,
    pub current_status: ShipmentStatus,
    pub current_location: Option<String>,
    pub origin: String,
    pub destination: String,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub has_exceptions: bool,
    pub last_tracked_at: Option<DateTime<Utc>>,
}

impl From<&Shipment> for ShipmentSnapshot {
    fn from(shipment: &Shipment) -> Self {
        Self {
            shipment_id: shipment.shipment_id,
            awb: shipment.awb.clone(),
            current_status: shipment.current_status,
            current_location: shipment.current_location.clone(),
            origin: shipment.origin.clone(),
            destination: shipment.destination.clone(),
            estimated_delivery_date: shipment.estimated_delivery_date,
            delivery_date: shipment.delivery_date,
            has_exceptions: shipment.has_exceptions,
            last_tracked_at: shipment.last_tracked_at,
        }
    }
}
