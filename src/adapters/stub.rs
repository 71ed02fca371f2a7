//! Stub adapters for integrations that are not wired up yet.
//!
//! Both return no data and never fail, so the scheduler can run the full
//! fan-out against a partial integration set.

use async_trait::async_trait;

use crate::domain::{CanonicalEvent, Shipment, SourceType};

use super::{Result, SourceAdapter};

/// Carrier API adapter stub.
#[derive(Debug, Default)]
pub struct CarrierAdapter;

#[async_trait]
impl SourceAdapter for CarrierAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Carrier
    }

    async fn fetch(&self, _shipment: &Shipment) -> Result<Vec<CanonicalEvent>> {
        Ok(Vec::new())
    }
}

/// Customs API adapter stub.
#[derive(Debug, Default)]
pub struct CustomsAdapter;

#[async_trait]
impl SourceAdapter for CustomsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Customs
    }

    async fn fetch(&self, _shipment: &Shipment) -> Result<Vec<CanonicalEvent>> {
        Ok(Vec::new())
    }
}
