//! Canonical event code to shipment status mapping.

use super::ShipmentStatus;

/// Map a canonical event code to the shipment status it implies, or
/// `None` for codes that do not move the status (location pings,
/// free-form status notes, sensor alerts).
///
/// `Cancelled` never appears here: it is set only by administrative
/// intervention, not by tracking events.
pub fn status_for_code(code: &str) -> Option<ShipmentStatus> {
    match code {
        "SHIPMENT_CREATED" => Some(ShipmentStatus::Created),
        "BOOKING_CONFIRMED" | "CARGO_COLLECTED" => Some(ShipmentStatus::Booked),
        "MANIFESTED" => Some(ShipmentStatus::Manifested),
        "FLIGHT_DEPARTED" => Some(ShipmentStatus::Departed),
        "IN_TRANSIT" | "HOLD_RELEASED" => Some(ShipmentStatus::InTransit),
        "FLIGHT_ARRIVED" => Some(ShipmentStatus::Arrived),
        "CUSTOMS_CLEARANCE_START" | "CUSTOMS_CLEARED" => Some(ShipmentStatus::CustomsClearance),
        "CUSTOMS_HOLD" | "HOLD_PLACED" => Some(ShipmentStatus::OnHold),
        "OUT_FOR_DELIVERY" => Some(ShipmentStatus::OutForDelivery),
        "DELIVERED" => Some(ShipmentStatus::Delivered),
        "DELIVERY_ATTEMPTED" | "SHIPMENT_DELAYED" | "DAMAGE_REPORTED" => {
            Some(ShipmentStatus::Exception)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bearing_codes() {
        assert_eq!(
            status_for_code("CARGO_COLLECTED"),
            Some(ShipmentStatus::Booked)
        );
        assert_eq!(
            status_for_code("FLIGHT_DEPARTED"),
            Some(ShipmentStatus::Departed)
        );
        assert_eq!(status_for_code("DELIVERED"), Some(ShipmentStatus::Delivered));
        assert_eq!(
            status_for_code("CUSTOMS_HOLD"),
            Some(ShipmentStatus::OnHold)
        );
    }

    #[test]
    fn test_non_status_codes() {
        assert_eq!(status_for_code("LOCATION_UPDATE"), None);
        assert_eq!(status_for_code("STATUS_UPDATE"), None);
        assert_eq!(status_for_code("TEMPERATURE_ALERT"), None);
        assert_eq!(status_for_code("UNKNOWN_CODE"), None);
    }

    #[test]
    fn test_cancelled_never_derived() {
        for milestone in crate::domain::MILESTONE_CATALOG {
            assert_ne!(
                status_for_code(milestone.code),
                Some(ShipmentStatus::Cancelled)
            );
        }
    }
}
