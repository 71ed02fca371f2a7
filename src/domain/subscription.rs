//! Notification subscriptions and event matching.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EventCategory, TrackingEvent};

/// Out-of-band delivery channel for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    Email,
    Sms,
    Push,
    Webhook,
}

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Push => "PUSH",
            Self::Webhook => "WEBHOOK",
        }
    }

    pub const ALL: [DeliveryMethod; 4] = [Self::Email, Self::Sms, Self::Push, Self::Webhook];
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(Self::Email),
            "SMS" => Ok(Self::Sms),
            "PUSH" => Ok(Self::Push),
            "WEBHOOK" => Ok(Self::Webhook),
            other => Err(format!("unknown delivery method: {other}")),
        }
    }
}

/// A subscriber's standing request for event notifications on one
/// shipment. Unique by `(shipment_id, subscriber_id, method)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub shipment_id: Uuid,
    pub subscriber_id: Uuid,
    pub method: DeliveryMethod,
    /// Address for the chosen method: email address, phone number,
    /// device token, or webhook URL.
    pub endpoint: String,
    pub milestone: bool,
    pub exception: bool,
    pub location_updates: bool,
    pub all_events: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Filter semantics: an event matches iff `all_events` or any of the
    /// per-kind flags agrees with the event's classification.
    pub fn matches(&self, event: &TrackingEvent) -> bool {
        if !self.active {
            return false;
        }
        self.all_events
            || (self.milestone && event.is_milestone)
            || (self.exception && event.is_exception)
            || (self.location_updates && event.category == EventCategory::LocationUpdate)
    }
}

/// Request to create (or reactivate) a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub shipment_id: Uuid,
    pub subscriber_id: Uuid,
    pub method: DeliveryMethod,
    pub endpoint: String,
    #[serde(default)]
    pub milestone: bool,
    #[serde(default)]
    pub exception: bool,
    #[serde(default)]
    pub location_updates: bool,
    #[serde(default)]
    pub all_events: bool,
}

impl NewSubscription {
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("endpoint must not be empty".to_string());
        }
        if !(self.milestone || self.exception || self.location_updates || self.all_events) {
            return Err("subscription must select at least one event kind".to_string());
        }
        Ok(())
    }
}
