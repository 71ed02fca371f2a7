//! Push protocol messages.
//!
//! Serde-tagged enums exchanged over the bidirectional client session.
//! The front-end owns the socket; the hub owns these shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{milestone_for_code, Awb, EventSeverity, ShipmentSnapshot, TrackingEvent};

/// Messages a client sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
        subscriber_id: Uuid,
        #[serde(default)]
        customer_id: Option<Uuid>,
    },
    SubscribeShipment {
        #[serde(default)]
        shipment_id: Option<Uuid>,
        #[serde(default)]
        awb: Option<String>,
    },
    UnsubscribeShipment {
        shipment_id: Uuid,
    },
    SubscribeCustomer {
        customer_id: Uuid,
    },
    Ping,
}

/// Out-of-band notice carried alongside a critical update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalNotice {
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl CriticalNotice {
    /// Render the notice for a flagged event.
    pub fn for_event(event: &TrackingEvent) -> Self {
        let kind = if event.is_exception {
            "exception"
        } else if event.is_critical {
            "critical"
        } else {
            "milestone"
        };

        let title = milestone_for_code(&event.code)
            .map(|m| m.name.to_string())
            .unwrap_or_else(|| event.code.replace('_', " "));

        let body = match event.location.display() {
            Some(location) => format!("{} at {}", event.description, location),
            None => event.description.clone(),
        };

        Self {
            title,
            body,
            kind: kind.to_string(),
        }
    }
}

/// Messages the hub sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: Uuid,
        capabilities: Vec<String>,
        server_time: DateTime<Utc>,
    },
    Authenticated {
        subscriber_id: Uuid,
    },
    AuthError {
        reason: String,
    },
    Subscribed {
        shipment_id: Uuid,
        topic: String,
        snapshot: ShipmentSnapshot,
    },
    SubscriptionError {
        reason: String,
    },
    TrackingEvent {
        shipment_id: Uuid,
        awb: Awb,
        event: TrackingEvent,
        shipment_snapshot: ShipmentSnapshot,
    },
    CriticalUpdate {
        shipment_id: Uuid,
        awb: Awb,
        event: TrackingEvent,
        shipment_snapshot: ShipmentSnapshot,
        notification: CriticalNotice,
    },
    CustomerTrackingUpdate {
        customer_id: Uuid,
        #[serde(rename = "shipmentUpdate")]
        shipment_update: ShipmentSnapshot,
    },
    BulkTrackingUpdate {
        shipment_id: Uuid,
        events: Vec<TrackingEvent>,
    },
    SystemNotification {
        message: String,
        severity: EventSeverity,
    },
    ServiceShutdown {
        reason: String,
        server_time: DateTime<Utc>,
    },
    Pong {
        server_time: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Wire tag, mirrors the serde rename.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Authenticated { .. } => "authenticated",
            Self::AuthError { .. } => "auth_error",
            Self::Subscribed { .. } => "subscribed",
            Self::SubscriptionError { .. } => "subscription_error",
            Self::TrackingEvent { .. } => "tracking_event",
            Self::CriticalUpdate { .. } => "critical_update",
            Self::CustomerTrackingUpdate { .. } => "customer_tracking_update",
            Self::BulkTrackingUpdate { .. } => "bulk_tracking_update",
            Self::SystemNotification { .. } => "system_notification",
            Self::ServiceShutdown { .. } => "service_shutdown",
            Self::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CanonicalEvent;

    #[test]
    fn test_client_message_wire_shape() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        let raw = r#"{"type": "subscribe_shipment", "awb": "125-12345678"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubscribeShipment {
                shipment_id: None,
                awb: Some("125-12345678".to_string()),
            }
        );
    }

    #[test]
    fn test_server_message_tags() {
        let msg = ServerMessage::Pong {
            server_time: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(msg.kind(), "pong");
    }

    #[test]
    fn test_critical_notice_rendering() {
        let event = CanonicalEvent::classified(
            "FLIGHT_ARRIVED",
            "Flight CX261 arrived",
            Utc::now(),
            "UTC",
        );
        let mut event = event.into_event(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        event.location = crate::domain::EventLocation::airport("HKG");

        let notice = CriticalNotice::for_event(&event);
        assert_eq!(notice.title, "Flight arrived");
        assert_eq!(notice.body, "Flight CX261 arrived at HKG");
        assert_eq!(notice.kind, "critical");

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "critical");
    }
}
