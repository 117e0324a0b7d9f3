//! Rollout error types.

use thiserror::Error;

use fleetshift_core::FleetError;

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Fatal rollout errors. A failed rollout is never rolled back: capacity and
/// instance states are left where the failure found them.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(
        "maximum drain timeout of {timeout_secs} seconds has elapsed ({elapsed_secs}s) and {instances} instances are still draining"
    )]
    DrainTimeout {
        timeout_secs: u64,
        elapsed_secs: u64,
        instances: usize,
    },
}
