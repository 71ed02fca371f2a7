//! Shipment state derivation from the persisted event stream.
//!
//! Pure over the full event set: any permutation of the same events
//! yields the same derived state, which is what makes out-of-order
//! ingestion safe.

use chrono::{DateTime, Duration, Utc};

use super::milestone::milestone_for_code;
use super::status::status_for_code;
use super::{ShipmentStatus, TrackingEvent};

/// Derived shipment fields recomputed on every applied event.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedState {
    pub status: ShipmentStatus,
    pub location: Option<String>,
    pub delivery_date: Option<DateTime<Utc>>,
    /// ETA anchored at wheels-up plus the delivery SLA window. `None`
    /// means no departure seen yet; the intake estimate is retained.
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub has_exceptions: bool,
}

impl DerivedState {
    /// Fold the derived estimate with the value already on the shipment.
    /// Terminal shipments carry no estimate; otherwise a derived value
    /// replaces the stored one and absence retains it.
    pub fn merged_estimate(
        &self,
        existing: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if self.status.is_terminal() {
            None
        } else {
            self.estimated_delivery_date.or(existing)
        }
    }
}

/// Derive status, location, and delivery timestamps from `events`.
///
/// Events are ranked by `(event_datetime, created_at)`; the last
/// status-bearing event wins the status, the last non-empty location wins
/// the location, and `delivery_date` is set iff the winning status is
/// `Delivered`.
pub fn derive_state(events: &[TrackingEvent]) -> DerivedState {
    let mut ordered: Vec<&TrackingEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        (a.event_datetime, a.created_at).cmp(&(b.event_datetime, b.created_at))
    });

    let mut status = ShipmentStatus::Created;
    let mut status_event_time: Option<DateTime<Utc>> = None;
    let mut location: Option<String> = None;
    let mut departure_time: Option<DateTime<Utc>> = None;
    let mut has_exceptions = false;

    for event in &ordered {
        if let Some(mapped) = status_for_code(&event.code) {
            status = mapped;
            status_event_time = Some(event.event_datetime);
        }
        if let Some(rendered) = event.location.display() {
            location = Some(rendered);
        }
        if event.is_exception {
            has_exceptions = true;
        }
        if event.code == "FLIGHT_DEPARTED" {
            departure_time = Some(event.event_datetime);
        }
    }

    let delivery_date = if status == ShipmentStatus::Delivered {
        status_event_time
    } else {
        None
    };

    let estimated_delivery_date = if status.is_terminal() {
        None
    } else {
        departure_time.and_then(|departed| {
            milestone_for_code("DELIVERED")
                .map(|m| departed + Duration::minutes(m.sla_threshold_minutes as i64))
        })
    };

    DerivedState {
        status,
        location,
        delivery_date,
        estimated_delivery_date,
        has_exceptions,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::domain::{CanonicalEvent, EventLocation};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn event(code: &str, datetime: &str, airport: &str, created_at: DateTime<Utc>) -> TrackingEvent {
        let mut canonical = CanonicalEvent::classified(code, code, at(datetime), "UTC");
        if !airport.is_empty() {
            canonical.location = EventLocation::airport(airport);
        }
        let mut event = canonical.into_event(Uuid::new_v4(), Uuid::new_v4(), created_at);
        event.created_at = created_at;
        event
    }

    fn created(n: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + n, 0).unwrap()
    }

    #[test]
    fn test_empty_stream_is_created() {
        let state = derive_state(&[]);
        assert_eq!(state.status, ShipmentStatus::Created);
        assert!(state.location.is_none());
        assert!(state.delivery_date.is_none());
        assert!(!state.has_exceptions);
    }

    #[test]
    fn test_single_pickup_event() {
        let events = vec![event("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN", created(0))];
        let state = derive_state(&events);
        assert_eq!(state.status, ShipmentStatus::Booked);
        assert_eq!(state.location.as_deref(), Some("SIN"));
        assert!(state.delivery_date.is_none());
    }

    #[test]
    fn test_out_of_order_apply_is_permutation_invariant() {
        let collected = event("CARGO_COLLECTED", "2025-08-05T10:00:00Z", "SIN", created(0));
        let delivered = event("DELIVERED", "2025-08-07T12:00:00Z", "HKG", created(1));
        let departed = event("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN", created(2));

        let in_order = derive_state(&[
            collected.clone(),
            departed.clone(),
            delivered.clone(),
        ]);
        let scrambled = derive_state(&[collected, delivered, departed]);

        assert_eq!(in_order, scrambled);
        assert_eq!(scrambled.status, ShipmentStatus::Delivered);
        assert_eq!(scrambled.location.as_deref(), Some("HKG"));
        assert_eq!(
            scrambled.delivery_date,
            Some(at("2025-08-07T12:00:00Z"))
        );
    }

    #[test]
    fn test_created_at_breaks_event_time_ties() {
        let first = event("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", "HKG", created(0));
        let second = event("CUSTOMS_CLEARED", "2025-08-06T08:00:00Z", "HKG", created(5));
        let state = derive_state(&[second, first]);
        assert_eq!(state.status, ShipmentStatus::CustomsClearance);
    }

    #[test]
    fn test_location_retained_when_winner_has_none() {
        let located = event("FLIGHT_ARRIVED", "2025-08-06T08:00:00Z", "HKG", created(0));
        let unlocated = event("CUSTOMS_CLEARANCE_START", "2025-08-06T09:00:00Z", "", created(1));
        let state = derive_state(&[located, unlocated]);
        assert_eq!(state.status, ShipmentStatus::CustomsClearance);
        assert_eq!(state.location.as_deref(), Some("HKG"));
    }

    #[test]
    fn test_exception_flag_sticks() {
        let events = vec![
            event("SHIPMENT_DELAYED", "2025-08-05T10:00:00Z", "SIN", created(0)),
            event("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN", created(1)),
        ];
        let state = derive_state(&events);
        assert!(state.has_exceptions);
        assert_eq!(state.status, ShipmentStatus::Departed);
    }

    #[test]
    fn test_estimate_anchored_at_departure() {
        let events = vec![event(
            "FLIGHT_DEPARTED",
            "2025-08-05T14:00:00Z",
            "SIN",
            created(0),
        )];
        let state = derive_state(&events);
        let expected = at("2025-08-05T14:00:00Z") + Duration::minutes(2880);
        assert_eq!(state.estimated_delivery_date, Some(expected));
    }

    #[test]
    fn test_terminal_state_clears_estimate() {
        let events = vec![
            event("FLIGHT_DEPARTED", "2025-08-05T14:00:00Z", "SIN", created(0)),
            event("DELIVERED", "2025-08-07T12:00:00Z", "HKG", created(1)),
        ];
        let state = derive_state(&events);
        assert!(state.estimated_delivery_date.is_none());
        assert_eq!(state.merged_estimate(Some(at("2025-08-09T00:00:00Z"))), None);
    }

    #[test]
    fn test_merged_estimate_retains_intake_value() {
        let state = derive_state(&[event(
            "CARGO_COLLECTED",
            "2025-08-05T10:00:00Z",
            "SIN",
            created(0),
        )]);
        let intake = at("2025-08-09T00:00:00Z");
        assert_eq!(state.merged_estimate(Some(intake)), Some(intake));
    }
}
