//! Manual entry adapter.
//!
//! Operators record events through the write API; this adapter validates
//! and classifies those payloads the same way the automated sources do.
//! It never polls: `fetch` always comes back empty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CanonicalEvent, EventLocation, Shipment, SourceType};

use super::{Result, SourceAdapter};

/// Operator-entered event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualEventRequest {
    pub shipment_id: Uuid,
    /// Canonical event code.
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_datetime: DateTime<Utc>,
    /// Original timezone label when the operator transcribed local time.
    #[serde(default)]
    pub original_timezone: Option<String>,
    #[serde(default)]
    pub location: EventLocation,
    /// Upstream reference when transcribing from a carrier document.
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub additional_info: Option<serde_json::Value>,
    #[serde(default = "default_visible")]
    pub customer_visible: bool,
}

fn default_visible() -> bool {
    true
}

impl ManualEventRequest {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.code.is_empty()
            || !self
                .code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(format!(
                "event code must be an UPPER_SNAKE token: {:?}",
                self.code
            ));
        }
        Ok(())
    }
}

/// Adapter for operator-entered events.
#[derive(Debug, Default)]
pub struct ManualAdapter;

impl ManualAdapter {
    /// Normalize an operator payload into a canonical event.
    pub fn normalize(request: ManualEventRequest) -> std::result::Result<CanonicalEvent, String> {
        request.validate()?;

        let description = request
            .description
            .clone()
            .unwrap_or_else(|| request.code.replace('_', " ").to_lowercase());
        let timezone = request
            .original_timezone
            .clone()
            .unwrap_or_else(|| "UTC".to_string());

        let mut event = CanonicalEvent::classified(
            request.code,
            description,
            request.event_datetime,
            timezone,
        );
        event.location = request.location;
        event.external_id = request.external_id;
        event.reference = request.reference;
        event.additional_info = request.additional_info;
        event.customer_visible = request.customer_visible;
        Ok(event)
    }
}

#[async_trait]
impl SourceAdapter for ManualAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Manual
    }

    async fn fetch(&self, _shipment: &Shipment) -> Result<Vec<CanonicalEvent>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: &str) -> ManualEventRequest {
        ManualEventRequest {
            shipment_id: Uuid::new_v4(),
            code: code.to_string(),
            description: None,
            event_datetime: Utc::now(),
            original_timezone: None,
            location: EventLocation::airport("SIN"),
            external_id: None,
            reference: None,
            additional_info: None,
            customer_visible: true,
        }
    }

    #[test]
    fn test_normalize_milestone() {
        let event = ManualAdapter::normalize(request("CARGO_COLLECTED")).unwrap();
        assert_eq!(event.code, "CARGO_COLLECTED");
        assert!(event.is_milestone);
        assert_eq!(event.description, "cargo collected");
        assert_eq!(event.original_timezone, "UTC");
    }

    #[test]
    fn test_rejects_malformed_codes() {
        assert!(ManualAdapter::normalize(request("")).is_err());
        assert!(ManualAdapter::normalize(request("flight departed")).is_err());
        assert!(ManualAdapter::normalize(request("Flight-Departed")).is_err());
    }

    #[tokio::test]
    async fn test_fetch_is_empty() {
        let adapter = ManualAdapter;
        let shipment = crate::domain::NewShipment {
            awb: "125-12345678".parse().unwrap(),
            customer_id: Uuid::new_v4(),
            origin: "SIN".to_string(),
            destination: "HKG".to_string(),
            route: vec![],
            flight_number: None,
            flight_date: None,
            pieces: 1,
            weight_kg: 1.0,
            volume_m3: None,
            commodity: "docs".to_string(),
            declared_value: None,
            currency: None,
            pickup_date: None,
            estimated_delivery_date: None,
            tracking_frequency_minutes: None,
        }
        .into_shipment(Utc::now());

        assert!(adapter.fetch(&shipment).await.unwrap().is_empty());
    }
}
