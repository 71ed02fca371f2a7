//! Canonical tracking events.
//!
//! Adapters normalize upstream payloads into `CanonicalEvent`; the
//! pipeline stamps identity and provenance to produce the immutable
//! `TrackingEvent` that is persisted and fanned out.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::milestone::milestone_for_code;

/// Event classification on the wire and in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    StatusUpdate,
    LocationUpdate,
    Milestone,
    Exception,
    Notification,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusUpdate => "STATUS_UPDATE",
            Self::LocationUpdate => "LOCATION_UPDATE",
            Self::Milestone => "MILESTONE",
            Self::Exception => "EXCEPTION",
            Self::Notification => "NOTIFICATION",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATUS_UPDATE" => Ok(Self::StatusUpdate),
            "LOCATION_UPDATE" => Ok(Self::LocationUpdate),
            "MILESTONE" => Ok(Self::Milestone),
            "EXCEPTION" => Ok(Self::Exception),
            "NOTIFICATION" => Ok(Self::Notification),
            other => Err(format!("unknown event category: {other}")),
        }
    }
}

/// Severity attached by the classifying adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown event severity: {other}")),
        }
    }
}

/// Structured location extracted by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLocation {
    pub name: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub airport_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl EventLocation {
    /// Location known only by its airport code.
    pub fn airport(code: impl Into<String>) -> Self {
        Self {
            airport_code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.country.is_none()
            && self.city.is_none()
            && self.airport_code.is_none()
    }

    /// Single-line rendering used for the shipment's `current_location`.
    /// Airport code wins over the free-form name.
    pub fn display(&self) -> Option<String> {
        if let Some(code) = &self.airport_code {
            return Some(code.clone());
        }
        if let Some(name) = &self.name {
            return Some(name.clone());
        }
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => Some(format!("{city}, {country}")),
            (Some(city), None) => Some(city.clone()),
            (None, Some(country)) => Some(country.clone()),
            (None, None) => None,
        }
    }
}

/// Provenance stamped on a persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: Uuid,
    /// Stable upstream identifier, carried through verbatim. Never
    /// fabricated; absence forces the time-window dedup rule.
    pub external_id: Option<String>,
    pub reference: Option<String>,
}

/// Append-only tracking event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub event_id: Uuid,
    pub shipment_id: Uuid,
    /// Canonical event code, e.g. `FLIGHT_DEPARTED`.
    pub code: String,
    pub description: String,
    pub category: EventCategory,
    pub location: EventLocation,
    /// Absolute event time, normalized to UTC.
    pub event_datetime: DateTime<Utc>,
    /// Original timezone of the upstream timestamp, preserved verbatim
    /// (an offset like `+08:00` or a zone name).
    pub original_timezone: String,
    pub is_milestone: bool,
    pub is_exception: bool,
    pub is_critical: bool,
    pub severity: EventSeverity,
    pub source: SourceRef,
    pub temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    /// Opaque structured blob; serialized to text at the storage boundary.
    pub additional_info: Option<serde_json::Value>,
    pub customer_visible: bool,
    pub processed: bool,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Adapter output: a normalized event not yet tied to storage identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub code: String,
    pub description: String,
    pub category: EventCategory,
    pub location: EventLocation,
    pub event_datetime: DateTime<Utc>,
    pub original_timezone: String,
    pub is_milestone: bool,
    pub is_exception: bool,
    pub is_critical: bool,
    pub severity: EventSeverity,
    pub external_id: Option<String>,
    pub reference: Option<String>,
    pub temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub additional_info: Option<serde_json::Value>,
    pub customer_visible: bool,
}

/// Canonical codes that describe unplanned conditions.
const EXCEPTION_CODES: &[&str] = &[
    "DELIVERY_ATTEMPTED",
    "SHIPMENT_DELAYED",
    "DAMAGE_REPORTED",
    "CUSTOMS_HOLD",
    "HOLD_PLACED",
    "TEMPERATURE_ALERT",
];

impl CanonicalEvent {
    /// Build an event classified from the canonical code via the
    /// milestone catalog. Adapters start here and fill in location,
    /// provenance, and readings.
    pub fn classified(
        code: impl Into<String>,
        description: impl Into<String>,
        event_datetime: DateTime<Utc>,
        original_timezone: impl Into<String>,
    ) -> Self {
        let code = code.into();
        let milestone = milestone_for_code(&code);
        let is_exception = EXCEPTION_CODES.contains(&code.as_str());
        let category = if milestone.is_some() {
            EventCategory::Milestone
        } else if is_exception {
            EventCategory::Exception
        } else if code == "LOCATION_UPDATE" {
            EventCategory::LocationUpdate
        } else {
            EventCategory::StatusUpdate
        };
        let is_critical = milestone.map(|m| m.critical).unwrap_or(false)
            || matches!(code.as_str(), "DAMAGE_REPORTED" | "TEMPERATURE_ALERT");
        let severity = if code == "DAMAGE_REPORTED" {
            EventSeverity::Error
        } else if is_exception {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };

        Self {
            code,
            description: description.into(),
            category,
            location: EventLocation::default(),
            event_datetime,
            original_timezone: original_timezone.into(),
            is_milestone: milestone.is_some(),
            is_exception,
            is_critical,
            severity,
            external_id: None,
            reference: None,
            temperature_celsius: None,
            humidity_percent: None,
            additional_info: None,
            customer_visible: true,
        }
    }

    /// Stamp identity and provenance, producing the persistable event.
    pub fn into_event(self, shipment_id: Uuid, source_id: Uuid, now: DateTime<Utc>) -> TrackingEvent {
        TrackingEvent {
            event_id: Uuid::new_v4(),
            shipment_id,
            code: self.code,
            description: self.description,
            category: self.category,
            location: self.location,
            event_datetime: self.event_datetime,
            original_timezone: self.original_timezone,
            is_milestone: self.is_milestone,
            is_exception: self.is_exception,
            is_critical: self.is_critical,
            severity: self.severity,
            source: SourceRef {
                source_id,
                external_id: self.external_id,
                reference: self.reference,
            },
            temperature_celsius: self.temperature_celsius,
            humidity_percent: self.humidity_percent,
            additional_info: self.additional_info,
            customer_visible: self.customer_visible,
            processed: true,
            notification_sent: false,
            created_at: now,
        }
    }
}

impl TrackingEvent {
    /// Whether the hub should emit the out-of-band critical message
    /// alongside the normal event message.
    pub fn is_noteworthy(&self) -> bool {
        self.is_critical || self.is_exception || self.is_milestone
    }
}
