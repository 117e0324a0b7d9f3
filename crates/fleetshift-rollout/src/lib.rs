//! fleetshift-rollout — zero-downtime replacement of a cluster's instances.
//!
//! The rollout over-provisions the cluster's scaling group so instances with
//! the new launch configuration join, drains the old instances of their
//! tasks, and then restores the original capacity.
//!
//! # Components
//!
//! - **`config`** — timeout and sleep interval for the drain wait
//! - **`controller`** — the drain-and-wait state machine
//! - **`error`** — fatal rollout errors (lookup failures, drain timeout)

pub mod config;
pub mod controller;
pub mod error;

pub use config::RolloutConfig;
pub use controller::{ClusterRollout, RolloutPhase, RolloutReport};
pub use error::{RolloutError, RolloutResult};
