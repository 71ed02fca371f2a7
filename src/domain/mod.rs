//! Domain model for the tracking core.
//!
//! Entities are explicit structured types with fields declared once.
//! Reference data (milestone catalog, source table) lives here as static
//! definitions and is seeded into storage at schema init.

mod awb;
mod derive;
mod event;
mod milestone;
mod shipment;
mod source;
mod status;
mod subscription;

pub use awb::{Awb, AwbParseError};
pub use derive::{derive_state, DerivedState};
pub use event::{
    CanonicalEvent, EventCategory, EventLocation, EventSeverity, SourceRef, TrackingEvent,
};
pub use milestone::{milestone_for_code, Milestone, MilestoneCategory, MILESTONE_CATALOG};
pub use shipment::{NewShipment, Shipment, ShipmentSnapshot, ShipmentStatus};
pub use source::{Source, SourceType, SEED_SOURCES};
pub use status::status_for_code;
pub use subscription::{DeliveryMethod, NewSubscription, Subscription};
