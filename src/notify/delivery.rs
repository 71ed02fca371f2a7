//! Delivery method seams and rendering.
//!
//! The dispatcher hands a rendered notification to a `Deliverer` and
//! interprets the three-valued status; payload formatting stays here.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::domain::{DeliveryMethod, Subscription, TrackingEvent};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Ok,
    /// Worth retrying with backoff.
    Transient(String),
    /// Retrying will not help.
    Permanent(String),
}

/// Method-shaped notification content.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
    /// Structured payload for machine-facing methods.
    pub payload: serde_json::Value,
}

/// Render an event for a subscription's method.
pub fn render(event: &TrackingEvent, subscription: &Subscription) -> RenderedNotification {
    let location = event.location.display();
    let title = format!("Shipment update: {}", event.code.replace('_', " "));

    let body = match subscription.method {
        DeliveryMethod::Sms | DeliveryMethod::Push => match &location {
            Some(location) => format!("{} at {}", event.description, location),
            None => event.description.clone(),
        },
        DeliveryMethod::Email => {
            let mut lines = vec![event.description.clone()];
            if let Some(location) = &location {
                lines.push(format!("Location: {location}"));
            }
            lines.push(format!("Time: {}", event.event_datetime.to_rfc3339()));
            if event.is_exception {
                lines.push("This event is flagged as an exception.".to_string());
            }
            lines.join("\n")
        }
        DeliveryMethod::Webhook => event.description.clone(),
    };

    let payload = json!({
        "event_id": event.event_id,
        "shipment_id": event.shipment_id,
        "code": event.code,
        "description": event.description,
        "category": event.category,
        "event_datetime": event.event_datetime,
        "location": location,
        "is_milestone": event.is_milestone,
        "is_exception": event.is_exception,
        "is_critical": event.is_critical,
        "severity": event.severity,
    });

    RenderedNotification {
        title,
        body,
        payload,
    }
}

/// One delivery operation, method-agnostic from the dispatcher's side.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, endpoint: &str, notification: &RenderedNotification)
        -> DeliveryStatus;
}

/// Webhook delivery over HTTP POST.
pub struct WebhookDeliverer {
    client: reqwest::Client,
}

impl WebhookDeliverer {
    pub fn new(deadline: std::time::Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(deadline).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    async fn deliver(
        &self,
        endpoint: &str,
        notification: &RenderedNotification,
    ) -> DeliveryStatus {
        let response = self
            .client
            .post(endpoint)
            .json(&notification.payload)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryStatus::Ok
                } else if status.is_server_error()
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status == reqwest::StatusCode::REQUEST_TIMEOUT
                {
                    DeliveryStatus::Transient(format!("webhook returned {status}"))
                } else {
                    DeliveryStatus::Permanent(format!("webhook returned {status}"))
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                DeliveryStatus::Transient(e.to_string())
            }
            Err(e) => DeliveryStatus::Permanent(e.to_string()),
        }
    }
}

/// Stand-in for gateway-backed methods (email/SMS/push): logs the
/// notification and reports success. The real gateways plug in behind
/// the same trait.
pub struct LogDeliverer {
    method: DeliveryMethod,
}

impl LogDeliverer {
    pub fn new(method: DeliveryMethod) -> Self {
        Self { method }
    }
}

#[async_trait]
impl Deliverer for LogDeliverer {
    async fn deliver(
        &self,
        endpoint: &str,
        notification: &RenderedNotification,
    ) -> DeliveryStatus {
        info!(
            method = %self.method,
            endpoint = %endpoint,
            title = %notification.title,
            "notification delivered (log sink)"
        );
        DeliveryStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::domain::{CanonicalEvent, EventLocation};

    fn subscription(method: DeliveryMethod) -> Subscription {
        Subscription {
            subscription_id: Uuid::new_v4(),
            shipment_id: Uuid::new_v4(),
            subscriber_id: Uuid::new_v4(),
            method,
            endpoint: "x".to_string(),
            milestone: true,
            exception: false,
            location_updates: false,
            all_events: false,
            active: true,
            created_at: Utc::now(),
        }
    }

    fn event() -> TrackingEvent {
        let mut canonical = CanonicalEvent::classified(
            "FLIGHT_DEPARTED",
            "Flight departed",
            Utc::now(),
            "UTC",
        );
        canonical.location = EventLocation::airport("SIN");
        canonical.into_event(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_sms_rendering_is_short() {
        let rendered = render(&event(), &subscription(DeliveryMethod::Sms));
        assert_eq!(rendered.body, "Flight departed at SIN");
    }

    #[test]
    fn test_email_rendering_is_multiline() {
        let rendered = render(&event(), &subscription(DeliveryMethod::Email));
        assert!(rendered.body.contains("Location: SIN"));
        assert!(rendered.body.contains("Time: "));
    }

    #[test]
    fn test_payload_carries_flags() {
        let rendered = render(&event(), &subscription(DeliveryMethod::Webhook));
        assert_eq!(rendered.payload["is_milestone"], true);
        assert_eq!(rendered.payload["code"], "FLIGHT_DEPARTED");
    }
}
