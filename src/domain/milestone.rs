//! Static milestone catalog.
//!
//! Reference data: canonical milestone codes with their journey category,
//! ordering, criticality, and SLA windows. Read-only from the core's
//! perspective; seeded into the `milestones` reference table at schema
//! init so reporting can join against it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Journey phase a milestone belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneCategory {
    Pickup,
    Departure,
    Transit,
    Arrival,
    Customs,
    Delivery,
}

impl MilestoneCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pickup => "PICKUP",
            Self::Departure => "DEPARTURE",
            Self::Transit => "TRANSIT",
            Self::Arrival => "ARRIVAL",
            Self::Customs => "CUSTOMS",
            Self::Delivery => "DELIVERY",
        }
    }
}

impl fmt::Display for MilestoneCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PICKUP" => Ok(Self::Pickup),
            "DEPARTURE" => Ok(Self::Departure),
            "TRANSIT" => Ok(Self::Transit),
            "ARRIVAL" => Ok(Self::Arrival),
            "CUSTOMS" => Ok(Self::Customs),
            "DELIVERY" => Ok(Self::Delivery),
            other => Err(format!("unknown milestone category: {other}")),
        }
    }
}

/// Catalog entry for a significant journey checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestone {
    pub code: &'static str,
    pub name: &'static str,
    pub category: MilestoneCategory,
    /// Expected position in the journey; gaps left for insertions.
    pub sequence: u16,
    pub critical: bool,
    /// Typical dwell before the next checkpoint, minutes. Zero for
    /// instantaneous checkpoints.
    pub expected_duration_minutes: u32,
    /// Window after which the checkpoint counts as SLA-breached, minutes.
    pub sla_threshold_minutes: u32,
}

/// The canonical milestone catalog, in journey order.
pub const MILESTONE_CATALOG: &[Milestone] = &[
    Milestone {
        code: "SHIPMENT_CREATED",
        name: "Shipment created",
        category: MilestoneCategory::Pickup,
        sequence: 0,
        critical: false,
        expected_duration_minutes: 0,
        sla_threshold_minutes: 240,
    },
    Milestone {
        code: "CARGO_COLLECTED",
        name: "Cargo collected",
        category: MilestoneCategory::Pickup,
        sequence: 10,
        critical: false,
        expected_duration_minutes: 120,
        sla_threshold_minutes: 360,
    },
    Milestone {
        code: "MANIFESTED",
        name: "Manifested on flight",
        category: MilestoneCategory::Departure,
        sequence: 20,
        critical: false,
        expected_duration_minutes: 240,
        sla_threshold_minutes: 720,
    },
    Milestone {
        code: "FLIGHT_DEPARTED",
        name: "Flight departed",
        category: MilestoneCategory::Departure,
        sequence: 30,
        critical: true,
        expected_duration_minutes: 0,
        sla_threshold_minutes: 60,
    },
    Milestone {
        code: "FLIGHT_ARRIVED",
        name: "Flight arrived",
        category: MilestoneCategory::Arrival,
        sequence: 40,
        critical: true,
        expected_duration_minutes: 0,
        sla_threshold_minutes: 60,
    },
    Milestone {
        code: "CUSTOMS_CLEARANCE_START",
        name: "Customs clearance started",
        category: MilestoneCategory::Customs,
        sequence: 50,
        critical: false,
        expected_duration_minutes: 360,
        sla_threshold_minutes: 1440,
    },
    Milestone {
        code: "CUSTOMS_CLEARED",
        name: "Customs cleared",
        category: MilestoneCategory::Customs,
        sequence: 60,
        critical: false,
        expected_duration_minutes: 0,
        sla_threshold_minutes: 1440,
    },
    Milestone {
        code: "OUT_FOR_DELIVERY",
        name: "Out for delivery",
        category: MilestoneCategory::Delivery,
        sequence: 70,
        critical: false,
        expected_duration_minutes: 240,
        sla_threshold_minutes: 480,
    },
    Milestone {
        code: "DELIVERED",
        name: "Delivered",
        category: MilestoneCategory::Delivery,
        sequence: 80,
        critical: true,
        expected_duration_minutes: 0,
        sla_threshold_minutes: 2880,
    },
];

/// Look up a catalog entry by canonical event code.
pub fn milestone_for_code(code: &str) -> Option<&'static Milestone> {
    MILESTONE_CATALOG.iter().find(|m| m.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_ordered_and_unique() {
        let mut last_sequence = None;
        for milestone in MILESTONE_CATALOG {
            if let Some(prev) = last_sequence {
                assert!(milestone.sequence > prev, "catalog out of order");
            }
            last_sequence = Some(milestone.sequence);
            assert_eq!(
                MILESTONE_CATALOG
                    .iter()
                    .filter(|m| m.code == milestone.code)
                    .count(),
                1,
                "duplicate code {}",
                milestone.code
            );
        }
    }

    #[test]
    fn test_lookup() {
        let departed = milestone_for_code("FLIGHT_DEPARTED").unwrap();
        assert_eq!(departed.category, MilestoneCategory::Departure);
        assert!(departed.critical);
        assert!(milestone_for_code("LOCATION_UPDATE").is_none());
    }

    #[test]
    fn test_shipment_created_is_catalogued() {
        // Kept as a milestone: the creation marker anchors the journey.
        let created = milestone_for_code("SHIPMENT_CREATED").unwrap();
        assert_eq!(created.sequence, 0);
        assert_eq!(created.category, MilestoneCategory::Pickup);
    }
}
