//! Error taxonomy for the tracking core.
//!
//! Validation, not-found, access, duplicate, and store failures surface to
//! the caller. Upstream failures are absorbed by the scheduler and the
//! notification dispatcher and show up only in telemetry.

use crate::storage::StorageError;

/// Result type for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Errors that cross component boundaries.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Caller input violates a contract. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The named resource does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller identity does not own the resource.
    #[error("access denied")]
    AccessDenied,

    /// The event was already applied. Non-fatal outcome of Apply.
    #[error("duplicate event")]
    Duplicate,

    /// Upstream adapter failure that the caller may retry with backoff.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Upstream adapter failure that retrying will not fix.
    #[error("permanent upstream failure: {0}")]
    PermanentUpstream(String),

    /// Unexpected store failure. The current operation is rolled back.
    #[error("store failure: {0}")]
    Store(#[from] StorageError),
}

impl TrackingError {
    /// Whether this error reflects caller input rather than system state.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::AccessDenied | Self::NotFound(_)
        )
    }
}
