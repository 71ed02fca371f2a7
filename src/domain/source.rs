//! Upstream source reference data.
//!
//! Source priority is data, not code: the pipeline reads it from the
//! `sources` reference table when logging precedence decisions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of upstream supplying tracking events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    IndustryFeed,
    Carrier,
    Customs,
    GroundHandler,
    Manual,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IndustryFeed => "INDUSTRY_FEED",
            Self::Carrier => "CARRIER",
            Self::Customs => "CUSTOMS",
            Self::GroundHandler => "GROUND_HANDLER",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INDUSTRY_FEED" => Ok(Self::IndustryFeed),
            "CARRIER" => Ok(Self::Carrier),
            "CUSTOMS" => Ok(Self::Customs),
            "GROUND_HANDLER" => Ok(Self::GroundHandler),
            "MANUAL" => Ok(Self::Manual),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// A registered upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    /// Lower number wins when two sources supply the same logical event.
    pub priority: i32,
    pub active: bool,
}

/// Seed rows for the sources reference table. Fixed ids keep events
/// joinable across re-initialized environments.
pub const SEED_SOURCES: &[(u128, &str, SourceType, i32)] = &[
    (
        0x8f4e_2a10_0001_4c00_9a00_000000000001,
        "Industry tracking feed",
        SourceType::IndustryFeed,
        10,
    ),
    (
        0x8f4e_2a10_0001_4c00_9a00_000000000002,
        "Carrier API",
        SourceType::Carrier,
        20,
    ),
    (
        0x8f4e_2a10_0001_4c00_9a00_000000000003,
        "Customs API",
        SourceType::Customs,
        30,
    ),
    (
        0x8f4e_2a10_0001_4c00_9a00_000000000004,
        "Ground handler",
        SourceType::GroundHandler,
        40,
    ),
    (
        0x8f4e_2a10_0001_4c00_9a00_000000000005,
        "Manual entry",
        SourceType::Manual,
        50,
    ),
];

impl Source {
    /// Materialize the seed rows.
    pub fn seed_rows() -> Vec<Source> {
        SEED_SOURCES
            .iter()
            .map(|(id, name, source_type, priority)| Source {
                source_id: Uuid::from_u128(*id),
                name: (*name).to_string(),
                source_type: *source_type,
                priority: *priority,
                active: true,
            })
            .collect()
    }
}
