//! Error types shared by every fleetshift crate.

use thiserror::Error;

/// Result type alias for control plane and lookup operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors raised while talking to the control plane or interpreting its
/// answers. None of these are retried.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The remote state does not have the shape we expected: a scaling group
    /// that does not resolve to exactly one match, an undefined capacity, or
    /// an empty describe result for a nonempty request.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// A remote call failed outright.
    #[error("control plane call failed: {0}")]
    Remote(String),

    #[error("config error: {0}")]
    Config(String),
}
