//! Industry feed adapter.
//!
//! Pulls FSU-style status messages from the external tracking data
//! provider and normalizes them: CIMP status codes map to the canonical
//! vocabulary, timestamps normalize to UTC with the original offset
//! preserved, and locations land in the structured fields.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::warn;

use crate::config::FeedConfig;
use crate::domain::{CanonicalEvent, EventLocation, Shipment, SourceType};

use super::{AdapterError, Result, SourceAdapter};

/// Header carrying the feed API key.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Adapter for the external industry tracking feed.
pub struct IndustryFeedAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl IndustryFeedAdapter {
    pub fn new(config: &FeedConfig) -> std::result::Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&config.api_key) {
            headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SourceAdapter for IndustryFeedAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::IndustryFeed
    }

    async fn fetch(&self, shipment: &Shipment) -> Result<Vec<CanonicalEvent>> {
        let url = format!("{}/shipments/{}/events", self.base_url, shipment.awb);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            status if status.is_success() => {}
            // The feed answers 404 for AWBs it has not seen yet.
            reqwest::StatusCode::NOT_FOUND => return Ok(Vec::new()),
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(AdapterError::Transient("feed rate limit".to_string()))
            }
            status if status.is_server_error() => {
                return Err(AdapterError::Transient(format!("feed returned {status}")))
            }
            status => {
                return Err(AdapterError::Permanent(format!("feed returned {status}")))
            }
        }

        let payload: FeedResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Permanent(format!("malformed feed payload: {e}")))?;

        Ok(payload
            .events
            .into_iter()
            .filter_map(|raw| normalize(&shipment.awb.to_string(), raw))
            .collect())
    }
}

/// Feed wire format.
#[derive(Debug, Deserialize)]
pub(crate) struct FeedResponse {
    #[serde(default)]
    pub events: Vec<FeedEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedEvent {
    /// CIMP status code, e.g. `DEP`.
    pub status_code: String,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC 3339 timestamp in the station's local offset.
    pub event_time: String,
    #[serde(default)]
    pub station: Option<FeedStation>,
    /// Stable upstream message id.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub flight: Option<String>,
    #[serde(default)]
    pub temperature_celsius: Option<f64>,
    #[serde(default)]
    pub humidity_percent: Option<f64>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedStation {
    #[serde(default)]
    pub iata: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Map a CIMP status code to the canonical vocabulary.
fn canonical_code(status_code: &str) -> Option<&'static str> {
    match status_code {
        "BKD" => Some("BOOKING_CONFIRMED"),
        "RCS" => Some("CARGO_COLLECTED"),
        "MAN" => Some("MANIFESTED"),
        "DEP" => Some("FLIGHT_DEPARTED"),
        "ARR" | "RCF" => Some("FLIGHT_ARRIVED"),
        "TRM" => Some("IN_TRANSIT"),
        "CUS" => Some("CUSTOMS_CLEARANCE_START"),
        "CCD" => Some("CUSTOMS_CLEARED"),
        "NFD" => Some("OUT_FOR_DELIVERY"),
        "DLV" | "POD" => Some("DELIVERED"),
        "DIS" => Some("SHIPMENT_DELAYED"),
        "DMG" => Some("DAMAGE_REPORTED"),
        "HLD" => Some("HOLD_PLACED"),
        "REL" => Some("HOLD_RELEASED"),
        "POS" => Some("LOCATION_UPDATE"),
        _ => None,
    }
}

/// Normalize one feed message. Returns `None` when the message is
/// unusable, which is logged and dropped rather than failing the fetch.
pub(crate) fn normalize(awb: &str, raw: FeedEvent) -> Option<CanonicalEvent> {
    let parsed = match DateTime::parse_from_rfc3339(&raw.event_time) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(awb, status_code = %raw.status_code, error = %e,
                "dropping feed event with unparseable timestamp");
            return None;
        }
    };
    let event_datetime = parsed.with_timezone(&Utc);
    let original_timezone = format_offset(&parsed);

    let location = raw
        .station
        .map(|station| EventLocation {
            name: station.name,
            country: station.country,
            city: station.city,
            airport_code: station.iata,
            latitude: station.latitude,
            longitude: station.longitude,
        })
        .unwrap_or_default();

    let code = match canonical_code(&raw.status_code) {
        Some(code) => code.to_string(),
        None => {
            // Unknown vocabulary is only worth keeping when it says
            // something: a location or at least a description.
            if location.is_empty() && raw.description.is_none() {
                warn!(awb, status_code = %raw.status_code,
                    "dropping feed event with unknown code and no metadata");
                return None;
            }
            "STATUS_UPDATE".to_string()
        }
    };

    let description = raw
        .description
        .unwrap_or_else(|| format!("Feed status {}", raw.status_code));

    let mut event =
        CanonicalEvent::classified(code, description, event_datetime, original_timezone);
    event.location = location;
    event.external_id = raw.message_id;
    event.reference = raw.flight;
    event.temperature_celsius = raw.temperature_celsius;
    event.humidity_percent = raw.humidity_percent;
    event.additional_info = raw.details;
    Some(event)
}

/// Render the original UTC offset, `UTC` for zero.
fn format_offset(parsed: &DateTime<chrono::FixedOffset>) -> String {
    let offset = parsed.offset();
    if offset.local_minus_utc() == 0 {
        "UTC".to_string()
    } else {
        offset.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_event(json: &str) -> FeedEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(canonical_code("DEP"), Some("FLIGHT_DEPARTED"));
        assert_eq!(canonical_code("RCF"), Some("FLIGHT_ARRIVED"));
        assert_eq!(canonical_code("DLV"), Some("DELIVERED"));
        assert_eq!(canonical_code("ZZZ"), None);
    }

    #[test]
    fn test_normalize_departure() {
        let raw = feed_event(
            r#"{
                "status_code": "DEP",
                "description": "Departed on CX261",
                "event_time": "2025-08-05T22:00:00+08:00",
                "station": {"iata": "SIN", "city": "Singapore", "country": "SG"},
                "message_id": "feed-9912",
                "flight": "CX261"
            }"#,
        );

        let event = normalize("125-12345678", raw).unwrap();
        assert_eq!(event.code, "FLIGHT_DEPARTED");
        assert!(event.is_milestone);
        assert_eq!(
            event.event_datetime,
            "2025-08-05T14:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(event.original_timezone, "+08:00");
        assert_eq!(event.location.airport_code.as_deref(), Some("SIN"));
        assert_eq!(event.external_id.as_deref(), Some("feed-9912"));
        assert_eq!(event.reference.as_deref(), Some("CX261"));
    }

    #[test]
    fn test_normalize_utc_offset_label() {
        let raw = feed_event(
            r#"{"status_code": "ARR", "event_time": "2025-08-06T08:00:00Z",
                "station": {"iata": "HKG"}}"#,
        );
        let event = normalize("125-12345678", raw).unwrap();
        assert_eq!(event.original_timezone, "UTC");
    }

    #[test]
    fn test_unknown_code_with_metadata_becomes_status_update() {
        let raw = feed_event(
            r#"{"status_code": "XYZ", "description": "Handed to trucker",
                "event_time": "2025-08-06T08:00:00Z"}"#,
        );
        let event = normalize("125-12345678", raw).unwrap();
        assert_eq!(event.code, "STATUS_UPDATE");
        assert!(!event.is_milestone);
    }

    #[test]
    fn test_unknown_code_without_metadata_is_dropped() {
        let raw = feed_event(r#"{"status_code": "XYZ", "event_time": "2025-08-06T08:00:00Z"}"#);
        assert!(normalize("125-12345678", raw).is_none());
    }

    #[test]
    fn test_bad_timestamp_is_dropped() {
        let raw = feed_event(r#"{"status_code": "DEP", "event_time": "last tuesday"}"#);
        assert!(normalize("125-12345678", raw).is_none());
    }

    #[test]
    fn test_missing_message_id_stays_absent() {
        // No upstream id means none: fabricating one would defeat the
        // time-window dedup rule.
        let raw = feed_event(
            r#"{"status_code": "DEP", "event_time": "2025-08-05T22:00:00+08:00"}"#,
        );
        let event = normalize("125-12345678", raw).unwrap();
        assert!(event.external_id.is_none());
    }
}
