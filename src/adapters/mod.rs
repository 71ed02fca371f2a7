//! Source adapters.
//!
//! Each adapter exposes one operation: fetch a shipment's tracking data
//! upstream and normalize it to canonical events. Adapters classify
//! their failures as transient (caller retries with backoff) or permanent
//! (caller surfaces and moves on).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::FeedConfig;
use crate::domain::{CanonicalEvent, Shipment, SourceType};

pub mod industry_feed;
pub mod manual;
pub mod stub;

pub use industry_feed::IndustryFeedAdapter;
pub use manual::{ManualAdapter, ManualEventRequest};
pub use stub::{CarrierAdapter, CustomsAdapter};

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors from upstream fetches, split by retryability.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Connect failures, timeouts, 5xx, rate limits. Retry with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Auth rejections, other 4xx, payloads that stay malformed after
    /// reasonable tolerance. Do not retry automatically.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return Self::Transient(e.to_string());
        }
        if let Some(status) = e.status() {
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Self::Transient(e.to_string());
            }
            return Self::Permanent(e.to_string());
        }
        if e.is_decode() {
            return Self::Permanent(e.to_string());
        }
        Self::Transient(e.to_string())
    }
}

/// Interface for upstream tracking sources.
///
/// Implementations:
/// - `IndustryFeedAdapter`: the external standardized feed over HTTP
/// - `ManualAdapter`: operator-entered events (never polls)
/// - `CarrierAdapter` / `CustomsAdapter`: stubs pending integration
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which source reference row to stamp on persisted events.
    fn source_type(&self) -> SourceType;

    /// Fetch new tracking data for a shipment. An empty list means no
    /// new data, which is the common case.
    async fn fetch(&self, shipment: &Shipment) -> Result<Vec<CanonicalEvent>>;
}

/// Build the adapter set from configuration.
pub fn init_adapters(
    feed: &FeedConfig,
) -> std::result::Result<Vec<Arc<dyn SourceAdapter>>, Box<dyn std::error::Error + Send + Sync>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if feed.enabled {
        adapters.push(Arc::new(IndustryFeedAdapter::new(feed)?));
        info!(base_url = %feed.base_url, "industry feed adapter enabled");
    } else {
        info!("industry feed adapter disabled by configuration");
    }

    adapters.push(Arc::new(CarrierAdapter::default()));
    adapters.push(Arc::new(CustomsAdapter::default()));

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_without_feed() {
        let adapters = init_adapters(&FeedConfig::default()).unwrap();
        assert_eq!(adapters.len(), 2);
        assert!(adapters
            .iter()
            .all(|a| a.source_type() != SourceType::IndustryFeed));
    }

    #[test]
    fn test_init_with_feed() {
        let config = FeedConfig {
            enabled: true,
            api_key: "k".to_string(),
            ..FeedConfig::default()
        };
        let adapters = init_adapters(&config).unwrap();
        assert_eq!(adapters.len(), 3);
        assert_eq!(adapters[0].source_type(), SourceType::IndustryFeed);
    }
}
