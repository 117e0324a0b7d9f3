//! fleetshift-health — post-deployment verification.
//!
//! Verifies that a service has converged to a healthy steady state after a
//! deployment change. Each criterion is a predicate polled with the shared
//! convergence poller from `fleetshift-core`.
//!
//! # Architecture
//!
//! ```text
//! DeploymentVerifier
//!   ├── applicable_checks(service)   Daemon | ActiveTasks, then Loadbalancer
//!   └── DeploymentChecker::run(kind, poll)
//!         ├── check_tasks_active()            running matching tasks ≥ replicas
//!         ├── check_daemon_fully_deployed()   every instance owns a matching task
//!         └── check_targets_healthy()         every target reports healthy
//! ```
//!
//! A check that does not converge in time is not an error: it yields a
//! failed `CheckOutcome` with a short reason suitable for display.

pub mod checker;
pub mod verifier;

pub use checker::{CheckKind, DeploymentChecker};
pub use verifier::{DeploymentVerifier, VerifierConfig, applicable_checks, resolve_service};
