//! fleetshift-core — shared building blocks for cluster rollouts and
//! deployment verification.
//!
//! # Architecture
//!
//! ```text
//! ControlPlane (trait)
//!   ├── InMemoryControlPlane   programmable fake, used by every test suite
//!   └── AwsControlPlane        lives in fleetshift-aws
//!
//! poll_until(config, predicate)
//!   └── consecutive-success polling with a wall-clock deadline
//! ```
//!
//! Everything the control plane returns is a transient snapshot. Nothing is
//! cached between polls; callers always re-query for freshness.

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod poll;
pub mod types;

pub use client::{ControlPlane, list_all_cluster_instances, scaling_group_capacity};
pub use config::FleetshiftConfig;
pub use error::{FleetError, FleetResult};
pub use memory::InMemoryControlPlane;
pub use poll::{PollConfig, poll_until, poll_until_since};
pub use types::*;
